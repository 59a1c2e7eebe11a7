pub const APP_NAME: &str = "hammer";

/// File name that marks a directory as holding a package spec.
pub const SPEC_FILE_NAME: &str = "spec.yml";

/// Script name that is never inherited from a parent variant.
pub const BUILD_SCRIPT: &str = "build";

/// Default comma separated list of package types to produce.
pub const DEFAULT_PACKAGE_TYPES: &str = "rpm";

/// Capacity of each subscriber channel of the output multiplexer.
pub const LINE_BUFFER: usize = 64;
