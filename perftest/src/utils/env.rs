pub const fn project_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

pub const fn project_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
