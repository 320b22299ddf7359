//! `meshd service` — systemd integration.
//!
//! Installs and manages a systemd unit that runs `meshd run` in the
//! background.

use anyhow::Result;
use std::process::Command;

const UNIT_PATH: &str = "/etc/systemd/system/meshd.service";

pub fn install(config_path: &std::path::Path) -> Result<()> {
    let already_active = Command::new("systemctl")
        .args(["is-active", "--quiet", "meshd"])
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    if already_active {
        println!("Service is already running.");
        println!();
        println!("  meshd service stop     — stop the service");
        println!("  meshd service restart  — restart the service");
        return Ok(());
    }

    let binary = std::env::current_exe()?;
    let config_abs = config_path.canonicalize().unwrap_or_else(|_| config_path.to_path_buf());

    let unit = format!(
        r#"[Unit]
Description=meshd — mesh telemetry ingestion daemon
After=network.target

[Service]
Type=simple
User=root
ExecStart={binary} -c {config} run
Restart=always
RestartSec=5
StandardOutput=journal
StandardError=journal

[Install]
WantedBy=multi-user.target
"#,
        binary = binary.display(),
        config = config_abs.display(),
    );

    std::fs::write(UNIT_PATH, unit)?;

    let _ = Command::new("systemctl").arg("daemon-reload").status();
    let _ = Command::new("systemctl").args(["enable", "meshd"]).status();
    let _ = Command::new("systemctl").args(["start", "meshd"]).status();

    println!("Service installed, enabled, and started.");
    println!();
    println!("  journalctl -u meshd -f  — follow logs");

    Ok(())
}

pub fn uninstall() -> Result<()> {
    let _ = Command::new("systemctl").args(["stop", "meshd"]).status();
    let _ = Command::new("systemctl").args(["disable", "meshd"]).status();
    std::fs::remove_file(UNIT_PATH)?;
    let _ = Command::new("systemctl").arg("daemon-reload").status();
    println!("Removed {}.", UNIT_PATH);
    Ok(())
}

pub fn control(action: &str) -> Result<()> {
    let ok = Command::new("systemctl").args([action, "meshd"]).status()?.success();
    anyhow::ensure!(ok, "systemctl {} meshd failed", action);
    Ok(())
}
