//! Config command implementation.

use std::path::PathBuf;

use anyhow::{Result, bail};
use soildash_core::settings::SETTINGS_KEY;
use soildash_core::{FileStore, Settings, SettingsManager, TemperatureUnit};
use tracing::info;

use crate::cli::ConfigAction;
use crate::util::write_output;

/// Keys accepted by `config set`.
pub const SETTABLE_KEYS: &[&str] = &[
    "device_ip",
    "polling_interval",
    "unit",
    "use_proxy",
    "proxy_url",
    "demo_mode",
    "dark_mode",
    "temp_min",
    "temp_max",
    "hum_min",
    "hum_max",
    "soil_min",
    "soil_max",
];

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => bail!("Invalid value for {}: expected true or false, got '{}'", key, value),
    }
}

fn parse_number(key: &str, value: &str) -> Result<f64> {
    match value.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => bail!("Invalid value for {}: expected a number, got '{}'", key, value),
    }
}

/// Apply one `key = value` change to `settings`.
pub fn apply_setting(settings: &mut Settings, key: &str, value: &str) -> Result<()> {
    match key {
        "device_ip" => settings.device_ip = value.trim().to_string(),
        "polling_interval" => {
            let secs: u64 = value
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid polling interval '{}': expected seconds", value))?;
            settings.polling_interval_ms = secs.saturating_mul(1000);
        }
        "unit" => {
            settings.temperature_unit = value
                .parse::<TemperatureUnit>()
                .map_err(anyhow::Error::msg)?;
        }
        "use_proxy" => settings.use_proxy = parse_bool(key, value)?,
        "proxy_url" => settings.proxy_url = value.trim_end_matches('/').to_string(),
        "demo_mode" => settings.demo_mode = parse_bool(key, value)?,
        "dark_mode" => settings.dark_mode = parse_bool(key, value)?,
        "temp_min" => settings.thresholds.temp_min = parse_number(key, value)?,
        "temp_max" => settings.thresholds.temp_max = parse_number(key, value)?,
        "hum_min" => settings.thresholds.hum_min = parse_number(key, value)?,
        "hum_max" => settings.thresholds.hum_max = parse_number(key, value)?,
        "soil_min" => settings.thresholds.soil_min = parse_number(key, value)?,
        "soil_max" => settings.thresholds.soil_max = parse_number(key, value)?,
        _ => bail!(
            "Unknown setting '{}'. Valid settings: {}",
            key,
            SETTABLE_KEYS.join(", ")
        ),
    }
    Ok(())
}

fn format_settings(settings: &Settings) -> String {
    let t = &settings.thresholds;
    let mut out = String::new();
    out.push_str(&format!("device_ip:         {}\n", settings.device_ip));
    out.push_str(&format!(
        "polling_interval:  {}s\n",
        settings.polling_interval().as_secs_f64()
    ));
    out.push_str(&format!("unit:              {}\n", settings.temperature_unit));
    out.push_str(&format!("use_proxy:         {}\n", settings.use_proxy));
    out.push_str(&format!("proxy_url:         {}\n", settings.proxy_url));
    out.push_str(&format!("demo_mode:         {}\n", settings.demo_mode));
    out.push_str(&format!("dark_mode:         {}\n", settings.dark_mode));
    out.push_str(&format!("temperature range: {} to {} °C\n", t.temp_min, t.temp_max));
    out.push_str(&format!("humidity range:    {} to {} %\n", t.hum_min, t.hum_max));
    out.push_str(&format!("soil range:        {} to {} %\n", t.soil_min, t.soil_max));
    out
}

pub fn cmd_config(
    action: ConfigAction,
    manager: &mut SettingsManager<FileStore>,
    output: Option<&PathBuf>,
    quiet: bool,
) -> Result<()> {
    match action {
        ConfigAction::Show => write_output(output, &format_settings(manager.settings())),
        ConfigAction::Path => {
            let path = manager.store().path_for(SETTINGS_KEY);
            write_output(output, &format!("{}\n", path.display()))
        }
        ConfigAction::Set { key, value } => {
            let mut candidate = manager.settings().clone();
            apply_setting(&mut candidate, &key, &value)?;
            candidate.validate()?;
            manager.update(|settings| *settings = candidate);
            if !quiet {
                info!("Set {} = {}", key, value);
            }
            Ok(())
        }
        ConfigAction::Reset => {
            manager.reset();
            if !quiet {
                info!("Settings restored to defaults");
            }
            Ok(())
        }
        ConfigAction::Clear => {
            manager.clear_all();
            if !quiet {
                info!("Removed stored settings and history");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &tempfile::TempDir) -> SettingsManager<FileStore> {
        SettingsManager::load(FileStore::new(dir.path()))
    }

    #[test]
    fn test_apply_setting() {
        let mut settings = Settings::default();
        apply_setting(&mut settings, "unit", "f").unwrap();
        apply_setting(&mut settings, "polling_interval", "10").unwrap();
        apply_setting(&mut settings, "demo_mode", "off").unwrap();
        apply_setting(&mut settings, "proxy_url", "http://pi.local:3000/").unwrap();
        apply_setting(&mut settings, "soil_min", "25.5").unwrap();

        assert_eq!(settings.temperature_unit, TemperatureUnit::Fahrenheit);
        assert_eq!(settings.polling_interval_ms, 10_000);
        assert!(!settings.demo_mode);
        assert_eq!(settings.proxy_url, "http://pi.local:3000");
        assert_eq!(settings.thresholds.soil_min, 25.5);
    }

    #[test]
    fn test_apply_setting_rejects_bad_input() {
        let mut settings = Settings::default();
        assert!(apply_setting(&mut settings, "colour", "blue").is_err());
        assert!(apply_setting(&mut settings, "use_proxy", "maybe").is_err());
        assert!(apply_setting(&mut settings, "temp_max", "hot").is_err());
        assert!(apply_setting(&mut settings, "unit", "kelvin").is_err());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_set_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = manager(&dir);
        cmd_config(
            ConfigAction::Set {
                key: "device_ip".to_string(),
                value: "10.0.0.8".to_string(),
            },
            &mut m,
            None,
            true,
        )
        .unwrap();

        assert_eq!(manager(&dir).settings().device_ip, "10.0.0.8");
    }

    #[test]
    fn test_set_rejects_invalid_combination() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = manager(&dir);
        let result = cmd_config(
            ConfigAction::Set {
                key: "temp_min".to_string(),
                value: "50".to_string(),
            },
            &mut m,
            None,
            true,
        );

        assert!(result.is_err());
        assert_eq!(m.settings().thresholds.temp_min, 10.0);
        assert!(!m.store().path_for(SETTINGS_KEY).exists());
    }

    #[test]
    fn test_reset_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = manager(&dir);
        m.update(|s| s.dark_mode = true);
        assert!(m.store().path_for(SETTINGS_KEY).exists());

        cmd_config(ConfigAction::Reset, &mut m, None, true).unwrap();
        assert!(!m.settings().dark_mode);

        cmd_config(ConfigAction::Clear, &mut m, None, true).unwrap();
        assert!(!m.store().path_for(SETTINGS_KEY).exists());
    }

    #[test]
    fn test_show_writes_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = manager(&dir);
        let out = dir.path().join("show.txt");
        cmd_config(ConfigAction::Show, &mut m, Some(&out), true).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains("device_ip:         192.168.4.1"));
        assert!(text.contains("unit:              celsius"));
    }
}
