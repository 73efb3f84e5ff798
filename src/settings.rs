// src/settings.rs

use crate::looper::{NUM_LOOPS, TOTAL_ARENA_SAMPLES};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppSettings {
    pub host_name: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: Option<u32>,
    pub buffer_size: Option<u32>,
    pub num_loops: usize,
    pub arena_samples: usize,
    pub spill_to_disk: bool,
    pub data_dir: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            host_name: None,
            input_device: None,
            output_device: None,
            sample_rate: None,
            buffer_size: None,
            num_loops: NUM_LOOPS,
            arena_samples: TOTAL_ARENA_SAMPLES,
            spill_to_disk: false,
            data_dir: None,
        }
    }
}

fn settings_path() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stomploop_settings.json")
}

/// Load settings, falling back to defaults if the file is missing or broken.
pub fn load_settings() -> AppSettings {
    let path = settings_path();
    match fs::read_to_string(&path) {
        Ok(json_string) => match serde_json::from_str::<AppSettings>(&json_string) {
            Ok(mut settings) => {
                settings.num_loops = settings.num_loops.clamp(2, 16);
                settings
            }
            Err(e) => {
                eprintln!(
                    "Failed to parse {}: {}. Using default settings.",
                    path.display(),
                    e
                );
                AppSettings::default()
            }
        },
        Err(_) => AppSettings::default(),
    }
}

pub fn save_settings(settings: &AppSettings) {
    let path = settings_path();
    match serde_json::to_string_pretty(settings) {
        Ok(json_string) => {
            if let Err(e) = fs::write(&path, json_string) {
                eprintln!("Failed to write {}: {}", path.display(), e);
            }
        }
        Err(e) => eprintln!("Failed to serialize settings: {}", e),
    }
}
