use std::fs;
use std::path::Path;

use once_cell::sync::OnceCell;
use sysinfo::System;

use crate::device::traits::BackendKind;

static DETECTED_BACKEND: OnceCell<BackendKind> = OnceCell::new();

/// Jetson boards expose "tegra" in the device-tree compatible string, an
/// NVIDIA model name, or a tegra kernel release.
pub fn is_jetson_at(root: &Path) -> bool {
    if let Ok(compatible) = fs::read_to_string(root.join("proc/device-tree/compatible")) {
        if compatible.contains("tegra") {
            return true;
        }
    }

    if let Ok(model) = fs::read_to_string(root.join("proc/device-tree/model")) {
        let model = model.trim_end_matches('\0').trim();
        tracing::info!("Device model: {model}");
        if model.contains("NVIDIA") {
            return true;
        }
    }

    is_tegra_release(&System::kernel_version().unwrap_or_default())
}

pub fn is_jetson() -> bool {
    is_jetson_at(Path::new("/"))
}

fn is_tegra_release(release: &str) -> bool {
    let tegra = release.to_lowercase().contains("tegra");
    if tegra {
        tracing::info!("Detected 'tegra' in platform release {release}. Assuming Jetson device.");
    }
    tegra
}

pub fn is_windows() -> bool {
    cfg!(target_os = "windows")
}

pub fn get_os_type() -> &'static str {
    std::env::consts::OS
}

/// Picks the backend once per process; later calls return the cached answer.
pub fn detect_backend_kind() -> BackendKind {
    *DETECTED_BACKEND.get_or_init(|| {
        if is_jetson() {
            BackendKind::Jetson
        } else {
            tracing::info!("Jetson not detected, using NVML");
            BackendKind::Nvml
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_compatible_tegra() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("proc/device-tree")).unwrap();
        fs::write(
            root.path().join("proc/device-tree/compatible"),
            "nvidia,p3768-0000+p3767-0005\0nvidia,tegra234\0",
        )
        .unwrap();
        assert!(is_jetson_at(root.path()));
    }

    #[test]
    fn test_model_nvidia() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("proc/device-tree")).unwrap();
        fs::write(
            root.path().join("proc/device-tree/model"),
            "NVIDIA Jetson Orin Nano Developer Kit\0",
        )
        .unwrap();
        assert!(is_jetson_at(root.path()));
    }

    #[test]
    fn test_tegra_release() {
        assert!(is_tegra_release("5.10.120-tegra"));
        assert!(!is_tegra_release("6.8.0-45-generic"));
        assert!(!is_tegra_release(""));
    }
}
