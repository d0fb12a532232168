use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{DownloadReport, ProgressEvent, ProgressSink, RegistryReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_registry(result: &RegistryReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_download(result: &DownloadReport) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress events to the tracing subscriber.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub fn print_registry_summary(result: &RegistryReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}flux-stations registry{reset}");
    println!("{green}sites: {}{reset}", result.sites);
    for (network, count) in &result.per_network {
        println!("{green}  {network}: {count}{reset}");
    }
    println!("{green}with location: {}{reset}", result.spatial_sites);
    if result.warnings > 0 {
        println!("{yellow}malformed fields: {}{reset}", result.warnings);
    }
    println!("{cyan}table: {}{reset}", result.csv_path);
    if let Some(path) = &result.shapefile_path {
        println!("{cyan}points: {path}{reset}");
    }
}

pub fn print_download_summary(result: &DownloadReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}flux-stations download{reset}");
    println!("{green}resolved: {}{reset}", result.resolved);
    println!("{green}already present: {}{reset}", result.already_present);
    println!("{red}failed: {}{reset}", result.failed);

    for item in &result.items {
        let color = match item.action.as_str() {
            "downloaded" => cyan,
            "already-present" => green,
            "conversion-failed" => yellow,
            _ => red,
        };
        println!("{color}{} {} ({}){reset}", item.site_id, item.name, item.action);
        if let Some(url) = &item.url {
            println!("{color}   url: {url}{reset}");
        }
        if let Some(error) = &item.error {
            println!("{color}   error: {error}{reset}");
        }
    }
}
