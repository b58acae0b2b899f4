//! Sensor sources for the mission computer.
//!
//! Host info and load come from a provider trait so the real `sysinfo`
//! backend can be swapped out. The environment source is simulated.

use mission_common::{Category, TelemetrySnapshot};
use mission_scheduler::{SensorSource, SourceError};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use sysinfo::System;
use thiserror::Error;

use crate::config::{FieldRange, MissionConfig};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// A host query failed.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0} is not available")]
    Unavailable(&'static str),
}

impl From<ProviderError> for SourceError {
    fn from(err: ProviderError) -> Self {
        SourceError::unavailable(err.to_string())
    }
}

/// Static description of the host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostInfo {
    pub os_name: String,
    pub os_version: String,
    pub cpu_model: String,
    pub cpu_cores: usize,
    pub total_memory_bytes: u64,
}

/// Current resource usage of the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadInfo {
    pub cpu_usage_percent: f64,
    pub used_memory_bytes: u64,
    pub total_memory_bytes: u64,
}

pub trait HostInfoProvider: Send + 'static {
    fn query(&mut self) -> Result<HostInfo, ProviderError>;
}

pub trait LoadProvider: Send + 'static {
    fn query(&mut self) -> Result<LoadInfo, ProviderError>;
}

/// Provider backed by `sysinfo`.
pub struct SysinfoProvider {
    system: System,
}

impl SysinfoProvider {
    pub fn new() -> Self {
        Self {
            system: System::new_all(),
        }
    }
}

impl Default for SysinfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl HostInfoProvider for SysinfoProvider {
    fn query(&mut self) -> Result<HostInfo, ProviderError> {
        self.system.refresh_memory();

        let cpus = self.system.cpus();
        let cpu_model = cpus
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .ok_or(ProviderError::Unavailable("CPU information"))?;

        let total_memory_bytes = self.system.total_memory();
        if total_memory_bytes == 0 {
            return Err(ProviderError::Unavailable("memory information"));
        }

        Ok(HostInfo {
            os_name: System::name().unwrap_or_else(|| "unknown".to_string()),
            os_version: System::os_version().unwrap_or_else(|| "unknown".to_string()),
            cpu_model,
            cpu_cores: cpus.len(),
            total_memory_bytes,
        })
    }
}

impl LoadProvider for SysinfoProvider {
    fn query(&mut self) -> Result<LoadInfo, ProviderError> {
        // Usage is measured since the previous refresh.
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let total_memory_bytes = self.system.total_memory();
        if total_memory_bytes == 0 {
            return Err(ProviderError::Unavailable("memory information"));
        }

        Ok(LoadInfo {
            cpu_usage_percent: self.system.global_cpu_usage() as f64,
            used_memory_bytes: self.system.used_memory(),
            total_memory_bytes,
        })
    }
}

/// Reports OS, CPU and total memory.
pub struct HostInfoSource<P> {
    provider: P,
}

impl<P: HostInfoProvider> HostInfoSource<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: HostInfoProvider> SensorSource for HostInfoSource<P> {
    fn category(&self) -> Category {
        Category::Info
    }

    fn sample(&mut self) -> Result<TelemetrySnapshot, SourceError> {
        let info = self.provider.query()?;

        Ok(TelemetrySnapshot::new(Category::Info)
            .with_metric("operating_system", info.os_name)
            .with_metric("operating_system_version", info.os_version)
            .with_metric("cpu_type", info.cpu_model)
            .with_metric("cpu_core_count", info.cpu_cores)
            .with_metric(
                "memory_size_gb",
                round_to(info.total_memory_bytes as f64 / BYTES_PER_GB, 2),
            ))
    }
}

/// Reports CPU and memory usage.
pub struct LoadSource<P> {
    provider: P,
}

impl<P: LoadProvider> LoadSource<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: LoadProvider> SensorSource for LoadSource<P> {
    fn category(&self) -> Category {
        Category::Load
    }

    fn sample(&mut self) -> Result<TelemetrySnapshot, SourceError> {
        let load = self.provider.query()?;
        if load.used_memory_bytes > load.total_memory_bytes {
            return Err(SourceError::sample(format!(
                "used memory {} exceeds total {}",
                load.used_memory_bytes, load.total_memory_bytes
            )));
        }

        let memory_percent =
            load.used_memory_bytes as f64 / load.total_memory_bytes as f64 * 100.0;

        Ok(TelemetrySnapshot::new(Category::Load)
            .with_metric("cpu_usage_percent", round_to(load.cpu_usage_percent, 1))
            .with_metric("memory_usage_percent", round_to(memory_percent, 1))
            .with_metric("memory_used_bytes", load.used_memory_bytes)
            .with_metric("memory_total_bytes", load.total_memory_bytes))
    }
}

/// Simulated habitat sensor.
///
/// Every sample draws each field uniformly from its range and rounds it to
/// the field's precision. The RNG belongs to this source alone.
pub struct EnvironmentSource {
    fields: Vec<FieldRange>,
    rng: SmallRng,
}

impl EnvironmentSource {
    pub fn new(fields: Vec<FieldRange>) -> Self {
        Self {
            fields,
            rng: SmallRng::from_os_rng(),
        }
    }

    /// Deterministic sequence for a given seed.
    pub fn with_seed(fields: Vec<FieldRange>, seed: u64) -> Self {
        Self {
            fields,
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl SensorSource for EnvironmentSource {
    fn category(&self) -> Category {
        Category::Environment
    }

    fn sample(&mut self) -> Result<TelemetrySnapshot, SourceError> {
        let mut snapshot = TelemetrySnapshot::new(Category::Environment);

        for field in &self.fields {
            field.check().map_err(SourceError::sample)?;
            let raw = self.rng.random_range(field.min..=field.max);
            let value = round_to(raw, field.precision).clamp(field.min, field.max);
            snapshot = snapshot.with_metric(field.name.as_str(), value);
        }

        Ok(snapshot)
    }
}

/// Build the source for a category.
///
/// Each call returns a fresh instance: no two tasks ever share a source.
pub fn build_source(category: Category, mission: &MissionConfig) -> Box<dyn SensorSource> {
    match category {
        Category::Info => Box::new(HostInfoSource::new(SysinfoProvider::new())),
        Category::Load => Box::new(LoadSource::new(SysinfoProvider::new())),
        Category::Environment => {
            Box::new(EnvironmentSource::new(mission.environment.fields.clone()))
        }
    }
}

fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}
