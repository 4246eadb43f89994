//! Crate-wide constants: file names, path conventions and default limits.

pub const APP_NAME: &str = "cooker";

/// Project configuration file, looked up at the project root.
pub const CONFIG_FILENAME: &str = "cooker.json";

pub const ASSET_EXTENSION: &str = "uasset";
pub const MAP_EXTENSION: &str = "umap";

/// Logical mount of the project's own `Content` directory.
pub const GAME_MOUNT: &str = "Game";

/// Logical prefix reserved for virtual packages that never have a source file.
pub const SCRIPT_PREFIX: &str = "/Script/";

pub const METADATA_DIR: &str = "Metadata";
pub const FINGERPRINT_FILENAME: &str = "ConfigFingerprint.txt";
pub const REGISTRY_FILENAME: &str = "AssetRegistry.bin";
pub const DEPENDENCY_GRAPH_FILENAME: &str = "MapDependencyGraph.json";

/// Suffixes appended to a child response file to name its outputs.
pub const CHILD_RESULT_SUFFIX: &str = "Result.txt";
pub const CHILD_LOG_SUFFIX: &str = "Log.txt";

/// A child worker is only spawned when its slice holds at least this many items.
pub const MIN_CHILD_PARTITION: usize = 5;

/// Characters reserved for the temporary names used while writing compressed artifacts.
pub const COMPRESSED_PATH_RESERVE: usize = 32;
pub const DEFAULT_MAX_PATH_LEN: usize = 260;

pub const DEFAULT_PORT: u16 = 41899;

/// Output format versions folded into every platform fingerprint.
pub const FORMAT_VERSIONS: &[(&str, u32)] = &[("Artifact", 1), ("Registry", 1)];
