//! Environment variable source: ATSYNC_* prefix with __ separator

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

/// Keys read as comma separated lists, e.g. `ATSYNC_NODES=AGENT,SYSTEM`.
const LIST_KEYS: [&str; 4] = ["nodes", "ignore_nodes", "external_nodes", "compact_mapping"];

/// Add environment variable overlay to builder.
/// Uses the ATSYNC_ prefix and __ as separator for nested keys (`ATSYNC_XML__SORT_ATTRIBUTES`).
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let environment = LIST_KEYS.iter().fold(
        Environment::with_prefix("ATSYNC")
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .try_parsing(true),
        |environment, key| environment.with_list_parse_key(key),
    );
    Ok(builder.add_source(environment))
}
