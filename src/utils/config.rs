//! TOML overrides on top of a config struct's defaults.

/// `parsed_config!(config_str => ConfigType; field_a, field_b)` starts from
/// `ConfigType::default()` and overrides the listed fields with the values
/// found in the optional TOML string. Any other key is an error.
#[macro_export]
macro_rules! parsed_config {
    ($config_str:expr => $config_type:ty; $($field:ident),+) => {{
        let config_str: Option<&str> = $config_str;

        let compose_config = || -> Result<$config_type, $crate::ViewmasterError> {
            let mut config: $config_type = Default::default();
            let Some(config_str) = config_str else {
                return Ok(config);
            };

            let mut table = config_str.parse::<toml::Table>()?;

            $({
                if let Some(v) = table.remove(stringify!($field)) {
                    config.$field = v.try_into()?;
                }
            })+

            // anything left over is not an accepted key
            if let Some(key) = table.keys().next() {
                return Err($crate::ViewmasterError::msg(format!(
                    "invalid field name '{}' in config",
                    key,
                )));
            }

            Ok(config)
        };

        compose_config()
    }};
}
