use anyhow::{Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::detect::MAX_SLIDER_CENTROIDS;
use crate::engine::{PadEngine, PadParams, SliderEngine, SliderKind, SliderParams, WidgetEngine};
use crate::filter::FilterKind;
use crate::tracker::TrackerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
    /// Path the daemon streams difference-signal frames from (file or FIFO).
    pub source: Option<String>,
    /// Path touch reports are appended to; stdout when unset.
    pub report: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidgetKind {
    LinearSlider,
    RadialSlider,
    DiplexSlider,
    Touchpad,
}

fn default_centroids() -> usize {
    1
}

fn default_iir_coeff() -> u8 {
    128
}

fn default_velocity() -> u32 {
    2500
}

#[derive(Debug, Clone, Deserialize)]
pub struct WidgetProfile {
    pub name: String,
    pub kind: WidgetKind,

    // 1-D widgets
    #[serde(default)]
    pub sensors: usize,
    #[serde(default = "default_centroids")]
    pub centroids: usize,
    #[serde(default)]
    pub diplex_table: Vec<u8>,

    // 2-D widgets
    #[serde(default)]
    pub cols: usize,
    #[serde(default)]
    pub rows: usize,

    pub resolution: u32,
    /// Touchpad Y axis; falls back to `resolution` when unset.
    #[serde(default)]
    pub y_resolution: u32,

    pub finger_threshold: u16,
    #[serde(default)]
    pub hysteresis: u16,
    #[serde(default = "default_velocity")]
    pub velocity: u32,
    #[serde(default)]
    pub on_debounce: u8,
    #[serde(default)]
    pub off_debounce: Option<u8>,

    #[serde(default)]
    pub position_filter: Option<String>,
    #[serde(default = "default_iir_coeff")]
    pub iir_coeff: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub meta: Meta,
    pub widgets: Vec<WidgetProfile>,
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

fn config_dir() -> PathBuf {
    let home = UserDirs::new().unwrap().home_dir().to_path_buf();
    home.join(".config").join("captouch")
}

fn profiles_dir() -> PathBuf {
    config_dir().join("profiles")
}

fn active_ptr_path() -> PathBuf {
    config_dir().join("active")
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        let cfgdir = config_dir();
        let profdir = profiles_dir();
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = active_ptr_path();
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = Self::load_profile(&active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
        })
    }

    pub fn reload(&mut self) -> Result<()> {
        self.profile = Self::load_profile(&self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.reload()?;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                if let Some(ext) = e.path().extension() {
                    if ext == "toml" {
                        if let Some(stem) = e.path().file_stem().and_then(|s| s.to_str()) {
                            v.push(stem.to_string());
                        }
                    }
                }
            }
        }
        v.sort();
        v
    }

    fn load_profile(name: &str) -> Result<Profile> {
        let path = profiles_dir().join(format!("{name}.toml"));
        let txt = fs::read_to_string(&path)
            .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
        parse_profile(&txt).map_err(|e| anyhow!("failed to load {}: {e}", path.display()))
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let source = self.profile.meta.source.clone();
        let source_present = source.as_deref().map(|s| Path::new(s).exists());
        serde_json::json!({
            "user": whoami::username(),
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "widgets": self.profile.widgets.iter()
                .map(|w| format!("{} ({:?})", w.name, w.kind))
                .collect::<Vec<_>>(),
            "frame_source": source,
            "frame_source_present": source_present,
            "report_path": self.profile.meta.report,
            "hints": {
                "frames": "write JSON lines {\"widget\": \"...\", \"diff\": [...]} to the frame source",
                "socket": crate::ipc::runtime::socket_path(),
            }
        })
    }
}

pub fn parse_profile(text: &str) -> Result<Profile> {
    let profile: Profile = toml::from_str(text)?;
    validate_profile(&profile)?;
    Ok(profile)
}

fn validate_profile(p: &Profile) -> Result<()> {
    if p.widgets.is_empty() {
        return Err(anyhow!("profile defines no widgets"));
    }

    let mut names: Vec<&str> = p.widgets.iter().map(|w| w.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    if names.len() != p.widgets.len() {
        return Err(anyhow!("widget names must be unique"));
    }

    for w in &p.widgets {
        if w.name.trim().is_empty() {
            return Err(anyhow!("empty widget name"));
        }
        if w.finger_threshold == 0 || w.finger_threshold <= w.hysteresis {
            return Err(anyhow!(
                "widget '{}': finger_threshold must be positive and above hysteresis",
                w.name
            ));
        }
        if !(1..=4096).contains(&w.resolution) {
            return Err(anyhow!("widget '{}': resolution must be in 1..=4096", w.name));
        }

        match w.kind {
            WidgetKind::LinearSlider | WidgetKind::RadialSlider => {
                if !(3..=255).contains(&w.sensors) {
                    return Err(anyhow!("widget '{}': sensors must be in 3..=255", w.name));
                }
                if !(1..=MAX_SLIDER_CENTROIDS).contains(&w.centroids) {
                    return Err(anyhow!(
                        "widget '{}': centroids must be in 1..={}",
                        w.name,
                        MAX_SLIDER_CENTROIDS
                    ));
                }
            }
            WidgetKind::DiplexSlider => {
                if !(3..=127).contains(&w.sensors) {
                    return Err(anyhow!("widget '{}': sensors must be in 3..=127", w.name));
                }
                if w.centroids != 1 {
                    return Err(anyhow!(
                        "widget '{}': diplexed sliders track a single centroid",
                        w.name
                    ));
                }
                if w.diplex_table.len() != 2 * w.sensors {
                    return Err(anyhow!(
                        "widget '{}': diplex_table must have {} entries (twice the sensor count)",
                        w.name,
                        2 * w.sensors
                    ));
                }
                if w.diplex_table.iter().any(|&i| usize::from(i) >= w.sensors) {
                    return Err(anyhow!(
                        "widget '{}': diplex_table entry out of sensor range",
                        w.name
                    ));
                }
            }
            WidgetKind::Touchpad => {
                if !(2..=128).contains(&w.cols) || !(2..=128).contains(&w.rows) {
                    return Err(anyhow!("widget '{}': cols and rows must be in 2..=128", w.name));
                }
                if w.y_resolution > 4096 {
                    return Err(anyhow!("widget '{}': y_resolution must be in 0..=4096", w.name));
                }
                if w.velocity == 0 {
                    return Err(anyhow!("widget '{}': velocity must be positive", w.name));
                }
            }
        }

        if let Some(f) = w.position_filter.as_deref() {
            let ok = matches!(f, "none" | "iir" | "median" | "average" | "jitter");
            if !ok {
                return Err(anyhow!("widget '{}': unknown position_filter '{f}'", w.name));
            }
            if f == "iir" && w.iir_coeff == 0 {
                return Err(anyhow!("widget '{}': iir_coeff must be positive", w.name));
            }
        }
    }
    Ok(())
}

fn filter_kind(w: &WidgetProfile) -> FilterKind {
    match w.position_filter.as_deref() {
        Some("iir") => FilterKind::Iir,
        Some("median") => FilterKind::Median,
        Some("average") => FilterKind::Average,
        Some("jitter") => FilterKind::Jitter,
        _ => FilterKind::None,
    }
}

/// Turn a validated profile into one engine per widget. Multipliers carry
/// the widget resolution in 8.8 fixed point, the form the centroid stage
/// consumes.
pub fn build_engines(profile: &Profile) -> Result<HashMap<String, WidgetEngine>> {
    let mut engines = HashMap::new();
    for w in &profile.widgets {
        let engine = match w.kind {
            WidgetKind::LinearSlider => WidgetEngine::Slider(SliderEngine::new(SliderParams {
                sensor_count: w.sensors,
                kind: SliderKind::Linear,
                finger_threshold: w.finger_threshold,
                multiplier: (w.resolution * 256) / (w.sensors as u32 - 1),
                multi_centroid: w.centroids > 1,
            })),
            WidgetKind::RadialSlider => WidgetEngine::Slider(SliderEngine::new(SliderParams {
                sensor_count: w.sensors,
                kind: SliderKind::Radial,
                finger_threshold: w.finger_threshold,
                multiplier: (w.resolution * 256) / w.sensors as u32,
                multi_centroid: w.centroids > 1,
            })),
            WidgetKind::DiplexSlider => WidgetEngine::Slider(SliderEngine::new(SliderParams {
                sensor_count: w.sensors,
                kind: SliderKind::Diplex(w.diplex_table.clone()),
                finger_threshold: w.finger_threshold,
                multiplier: (w.resolution * 256) / (2 * w.sensors as u32 - 1),
                multi_centroid: false,
            })),
            WidgetKind::Touchpad => {
                let y_resolution = if w.y_resolution == 0 { w.resolution } else { w.y_resolution };
                WidgetEngine::Pad(PadEngine::new(
                    PadParams {
                        cols: w.cols,
                        rows: w.rows,
                        x_multiplier: (w.resolution * 256) / (w.cols as u32 - 1),
                        y_multiplier: (y_resolution * 256) / (w.rows as u32 - 1),
                        tracking: TrackerConfig {
                            finger_threshold: w.finger_threshold,
                            hysteresis: w.hysteresis,
                            on_debounce: w.on_debounce,
                            off_debounce: w.off_debounce,
                            velocity: w.velocity,
                        },
                    },
                    filter_kind(w),
                    w.iir_coeff,
                ))
            }
        };
        engines.insert(w.name.clone(), engine);
    }
    Ok(engines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_parses_and_builds() {
        let profile = parse_profile(default_profile_text()).unwrap();
        assert!(!profile.widgets.is_empty());
        let engines = build_engines(&profile).unwrap();
        assert_eq!(engines.len(), profile.widgets.len());
    }

    #[test]
    fn slider_multiplier_encodes_resolution() {
        let profile = parse_profile(
            r#"
            [meta]
            name = "t"

            [[widgets]]
            name = "slider0"
            kind = "linear-slider"
            sensors = 8
            resolution = 70
            finger_threshold = 20
            "#,
        )
        .unwrap();
        let engines = build_engines(&profile).unwrap();
        match engines.get("slider0").unwrap() {
            WidgetEngine::Slider(s) => assert_eq!(s.params.multiplier, 2560),
            WidgetEngine::Pad(_) => panic!("expected a slider"),
        }
    }

    #[test]
    fn threshold_below_hysteresis_is_rejected() {
        let err = parse_profile(
            r#"
            [meta]
            name = "t"

            [[widgets]]
            name = "pad0"
            kind = "touchpad"
            cols = 8
            rows = 8
            resolution = 160
            finger_threshold = 10
            hysteresis = 10
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("hysteresis"));
    }

    #[test]
    fn diplex_table_length_is_checked() {
        let err = parse_profile(
            r#"
            [meta]
            name = "t"

            [[widgets]]
            name = "slider0"
            kind = "diplex-slider"
            sensors = 5
            resolution = 100
            finger_threshold = 20
            diplex_table = [0, 1, 2, 3, 4]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("diplex_table"));
    }

    #[test]
    fn duplicate_widget_names_are_rejected() {
        let err = parse_profile(
            r#"
            [meta]
            name = "t"

            [[widgets]]
            name = "w"
            kind = "linear-slider"
            sensors = 8
            resolution = 70
            finger_threshold = 20

            [[widgets]]
            name = "w"
            kind = "linear-slider"
            sensors = 8
            resolution = 70
            finger_threshold = 20
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unique"));
    }

    #[test]
    fn unknown_position_filter_is_rejected() {
        let err = parse_profile(
            r#"
            [meta]
            name = "t"

            [[widgets]]
            name = "pad0"
            kind = "touchpad"
            cols = 8
            rows = 8
            resolution = 160
            finger_threshold = 40
            position_filter = "kalman"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("position_filter"));
    }
}
