/// Application name
pub const APP_NAME: &str = "Tether";

/// Version of the running framework, checked against `minFrameworkVersion`
pub const FRAMEWORK_VERSION: &str = "1.0.0";

/// `minFrameworkVersion` assumed when a descriptor omits it
pub const DEFAULT_MIN_FRAMEWORK_VERSION: &str = "1.0.0";

/// Default directory searched for plugin libraries
pub const DEFAULT_PLUGIN_DIR: &str = "plugins";

/// Default directory holding `<id>.json` descriptors
pub const DEFAULT_METADATA_DIR: &str = "plugins/metadata";

/// Default configuration file looked up by the CLI
pub const DEFAULT_CONFIG_FILE: &str = "tether.toml";

/// Symbol a dynamic library must export to produce its plugin
pub const PLUGIN_CREATE_SYMBOL: &[u8] = b"_tether_plugin_create\0";

/// Permission names and descriptions registered by the host at startup.
/// The `communication.*` entries are the ones the message bus enforces.
pub const HOST_PERMISSIONS: &[(&str, &str)] = &[
    ("file.read", "Read files from the file system"),
    ("file.write", "Write files to the file system"),
    ("network.access", "Access the network"),
    ("database.access", "Access databases"),
    ("ui.modify", "Modify the user interface"),
    ("system.execute", "Execute system commands"),
];
