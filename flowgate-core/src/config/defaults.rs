pub(super) fn default_address() -> String {
    "0.0.0.0:9090".to_string()
}

pub(super) fn default_command_socket() -> String {
    std::env::temp_dir()
        .join("server.cmd.sock")
        .to_string_lossy()
        .into_owned()
}

pub(super) fn default_timeout_read_external_process() -> u64 {
    30
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}
