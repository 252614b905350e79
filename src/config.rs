use crate::error::BridgeError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Names the module exports and imports under. The defaults are what
/// wasm-bindgen generates for a `WasmCpu` type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportNames {
    pub memory: String,
    pub construct: String,
    pub destroy: String,
    pub load_program: String,
    pub query_exit: String,
    pub allocate: String,
    pub free: String,
    pub argument_slot_base: String,
    /// namespace the module imports host functions from
    pub import_module: String,
    pub error_callback: String,
    pub random_source: String,
}

impl Default for ExportNames {
    fn default() -> Self {
        ExportNames {
            memory: "memory".into(),
            construct: "wasmcpu_new".into(),
            destroy: "__wbg_wasmcpu_free".into(),
            load_program: "wasmcpu_load_rom".into(),
            query_exit: "wasmcpu_exit".into(),
            allocate: "__wbindgen_malloc".into(),
            free: "__wbindgen_free".into(),
            argument_slot_base: "__wbindgen_global_argument_ptr".into(),
            import_module: "./rusty_chip".into(),
            error_callback: "__wbindgen_throw".into(),
            random_source: "__wbg_f_random_random_n".into(),
        }
    }
}

/// Settings for a run of the host loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// frames per second the host loop is paced at
    pub frame_rate: u32,
    /// stop after this many frames, if set
    pub max_frames: Option<u64>,
    /// seed for the module's random source; entropy if unset
    pub seed: Option<u64>,
    /// render nowhere and read no keyboard
    pub headless: bool,
    pub exports: ExportNames,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            frame_rate: 60,
            max_frames: None,
            seed: None,
            headless: false,
            exports: ExportNames::default(),
        }
    }
}

impl HostConfig {
    /// parse a TOML config; missing keys keep their defaults
    pub fn from_toml(text: &str) -> Result<Self, BridgeError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// time budget for one frame; a zero frame rate means unpaced
    pub fn frame_interval(&self) -> Duration {
        match self.frame_rate {
            0 => Duration::ZERO,
            rate => Duration::from_secs(1) / rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = HostConfig::default();
        assert_eq!(c.frame_rate, 60);
        assert_eq!(c.exports.allocate, "__wbindgen_malloc");
        assert_eq!(c.exports.import_module, "./rusty_chip");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c = HostConfig::from_toml(
            r#"
            frame_rate = 30
            seed = 7

            [exports]
            construct = "cpu_new"
            "#,
        )
        .unwrap();
        assert_eq!(c.frame_rate, 30);
        assert_eq!(c.seed, Some(7));
        assert_eq!(c.exports.construct, "cpu_new");
        assert_eq!(c.exports.destroy, "__wbg_wasmcpu_free");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let res = HostConfig::from_toml("frame_rte = 30");
        assert!(matches!(res, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_frame_interval() {
        let mut c = HostConfig::default();
        c.frame_rate = 50;
        assert_eq!(c.frame_interval(), Duration::from_millis(20));
        c.frame_rate = 0;
        assert_eq!(c.frame_interval(), Duration::ZERO);
    }
}
