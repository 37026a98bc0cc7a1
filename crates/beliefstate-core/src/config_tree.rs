//! Configuration tree builder: turns a TOML section into a [`ConfigTree`].
//!
//! Pure format adapter: scalars become leaves, tables become child nodes,
//! arrays become child nodes keyed by element index. Value kinds the tree
//! cannot represent (TOML datetimes) are skipped.

use beliefstate_plugin::ConfigTree;

/// Field naming the plugin a `[[plugin-config]]` entry belongs to.
pub const PLUGIN_MARKER: &str = "plugin";

/// Build a plugin's tree from an optional section. An absent section
/// yields an empty tree.
pub fn build_config_tree(section: Option<&toml::Value>, ignore_plugin_field: bool) -> ConfigTree {
    let mut tree = ConfigTree::new();
    if let Some(section) = section {
        populate(section, &mut tree, ignore_plugin_field);
    }
    tree
}

/// Populate `into` from `section`.
///
/// With `ignore_plugin_field`, a top-level [`PLUGIN_MARKER`] key is left
/// out of the tree; nested keys of the same name are kept.
pub fn populate(section: &toml::Value, into: &mut ConfigTree, ignore_plugin_field: bool) {
    match section {
        toml::Value::Table(table) => load_table(table, into, ignore_plugin_field),
        other => load_value("", other, into),
    }
}

/// Build the private tree of `plugin` from the `plugin-config` section.
///
/// The section is either a table keyed by plugin name, or an array of
/// tables each tagged with a [`PLUGIN_MARKER`] field. Several matching
/// array entries are merged in order, later keys winning.
pub fn plugin_config_tree(section: Option<&toml::Value>, plugin: &str) -> ConfigTree {
    match section {
        Some(toml::Value::Table(by_name)) => build_config_tree(by_name.get(plugin), true),
        Some(toml::Value::Array(entries)) => {
            let mut tree = ConfigTree::new();
            for entry in entries {
                let tagged = entry
                    .get(PLUGIN_MARKER)
                    .and_then(toml::Value::as_str)
                    .is_some_and(|tag| tag == plugin);
                if tagged {
                    tree.merge(build_config_tree(Some(entry), true));
                }
            }
            tree
        }
        Some(other) => {
            tracing::warn!(
                plugin = %plugin,
                kind = other.type_str(),
                "plugin-config must be a table or an array of tables, ignoring"
            );
            ConfigTree::new()
        }
        None => ConfigTree::new(),
    }
}

fn load_table(table: &toml::Table, into: &mut ConfigTree, ignore_plugin_field: bool) {
    for (key, value) in table {
        if ignore_plugin_field && key == PLUGIN_MARKER {
            continue;
        }
        if is_supported(key, value) {
            load_value(key, value, into.child_mut(key));
        }
    }
}

fn load_value(path: &str, value: &toml::Value, node: &mut ConfigTree) {
    match value {
        toml::Value::String(s) => node.set_value(s.as_str()),
        toml::Value::Integer(i) => node.set_value(*i),
        toml::Value::Float(f) => node.set_value(*f),
        toml::Value::Boolean(b) => node.set_value(*b),
        toml::Value::Table(table) => load_table(table, node, false),
        toml::Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                let key = index.to_string();
                if is_supported(&format!("{path}.{key}"), item) {
                    load_value(&key, item, node.child_mut(&key));
                }
            }
        }
        // filtered out by is_supported
        toml::Value::Datetime(_) => {}
    }
}

fn is_supported(path: &str, value: &toml::Value) -> bool {
    if matches!(value, toml::Value::Datetime(_)) {
        tracing::debug!(key = %path, "skipping unsupported configuration value");
        return false;
    }
    true
}
