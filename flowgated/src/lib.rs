pub mod body;
pub mod conduit;
pub mod control;
pub mod ingress;
pub mod multipart;
pub mod reaper;
pub mod registry;
pub mod runtime;
pub mod semantics;
