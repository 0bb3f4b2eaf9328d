//! Synthetic cloud environment metrics
//!
//! Generates hourly CPU, network and login readings with daily cycles and
//! injects DDoS, brute force and resource exhaustion patterns. All noise is
//! drawn from a seeded ChaCha RNG, so a fixed seed and start time always
//! produce the same dataset.

use crate::error::{PipelineError, Result};
use crate::models::{metric, AttackKind, MetricSample};
use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Poisson};
use std::f64::consts::PI;

/// Points in the dashboard burst window (two hours at five minutes)
pub const BURST_WINDOW_POINTS: usize = 25;

/// Trailing points of the burst window that carry the injected burst
pub const BURST_POINTS: usize = 4;

/// Simulation parameters
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub days: u32,
    pub attack_intensity: f64,
    pub seed: u64,
    /// First timestamp; defaults to `days` before the current hour
    pub start: Option<DateTime<Utc>>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            days: 7,
            attack_intensity: 1.0,
            seed: 42,
            start: None,
        }
    }
}

/// Simulated samples with per-sample ground truth
#[derive(Debug, Clone)]
pub struct SimulatedDataset {
    pub samples: Vec<MetricSample>,
    pub labels: Vec<Option<AttackKind>>,
}

impl SimulatedDataset {
    fn unlabeled(samples: Vec<MetricSample>) -> Self {
        let labels = vec![None; samples.len()];
        Self { samples, labels }
    }

    /// Ground-truth anomaly flags, one per sample
    pub fn truth(&self) -> Vec<bool> {
        self.labels.iter().map(Option::is_some).collect()
    }

    pub fn attack_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_some()).count()
    }

    /// Clamp the attack window to the dataset and return its index range
    fn window(&self, start: usize, duration: usize) -> std::ops::Range<usize> {
        let start = start.min(self.samples.len());
        let end = (start + duration).min(self.samples.len());
        start..end
    }

    fn update(&mut self, idx: usize, name: &str, f: impl FnOnce(f64) -> f64) {
        let entry = self.samples[idx]
            .readings
            .entry(name.to_string())
            .or_insert(0.0);
        *entry = f(*entry);
    }
}

/// Seeded generator for cloud environment traffic
pub struct CloudSimulator {
    rng: ChaCha8Rng,
    attack_intensity: f64,
}

impl CloudSimulator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            attack_intensity: 1.0,
        }
    }

    pub fn with_attack_intensity(mut self, intensity: f64) -> Self {
        self.attack_intensity = intensity;
        self
    }

    /// Hourly baseline traffic without attacks
    pub fn generate_normal_traffic(
        &mut self,
        start: DateTime<Utc>,
        points: usize,
    ) -> Result<Vec<MetricSample>> {
        let cpu_noise = normal(0.0, 0.05)?;
        let network_noise = normal(0.0, 0.08)?;
        let login_noise = poisson(1.0)?;

        let samples = (0..points)
            .map(|i| {
                let timestamp = start + Duration::hours(i as i64);
                let hour = timestamp.hour() as f64;

                let cpu_pattern = 0.3 + 0.2 * (2.0 * PI * hour / 24.0).sin();
                let cpu = (cpu_pattern + cpu_noise.sample(&mut self.rng)).clamp(0.0, 1.0);

                let network_pattern = 0.2 + 0.3 * (2.0 * PI * (hour - 6.0) / 24.0).sin();
                let network =
                    (network_pattern + network_noise.sample(&mut self.rng)).clamp(0.0, 1.0);

                let login_pattern = 2.0 + 3.0 * (2.0 * PI * (hour - 8.0) / 12.0).sin().max(0.0);
                let noise: f64 = login_noise.sample(&mut self.rng);
                let logins = (login_pattern + noise).max(0.0);

                MetricSample::new(timestamp)
                    .with_reading(metric::CPU_USAGE, cpu)
                    .with_reading(metric::NETWORK_TRAFFIC, network)
                    .with_reading(metric::LOGIN_ATTEMPTS, logins)
            })
            .collect();

        Ok(samples)
    }

    /// Network flood: traffic and CPU multiplied, clipped to [0, 1]
    pub fn inject_ddos(&self, data: &mut SimulatedDataset, start: usize, duration: usize) {
        let network_factor = 1.0 + 4.0 * self.attack_intensity;
        let cpu_factor = 1.0 + 0.8 * self.attack_intensity;
        for idx in data.window(start, duration) {
            data.update(idx, metric::NETWORK_TRAFFIC, |v| {
                (v * network_factor).clamp(0.0, 1.0)
            });
            data.update(idx, metric::CPU_USAGE, |v| (v * cpu_factor).clamp(0.0, 1.0));
            data.labels[idx] = Some(AttackKind::Ddos);
        }
    }

    /// Credential stuffing: login attempts jump sharply
    pub fn inject_brute_force(&self, data: &mut SimulatedDataset, start: usize, duration: usize) {
        let extra = 50.0 * self.attack_intensity;
        for idx in data.window(start, duration) {
            data.update(idx, metric::LOGIN_ATTEMPTS, |v| v + extra);
            data.labels[idx] = Some(AttackKind::BruteForce);
        }
    }

    /// CPU ramps toward saturation over the attack window
    pub fn inject_resource_exhaustion(
        &self,
        data: &mut SimulatedDataset,
        start: usize,
        duration: usize,
    ) {
        let window = data.window(start, duration);
        let span = window.len().max(1) as f64;
        let ramp = 0.6 * self.attack_intensity;
        for idx in window.clone() {
            let progress = (idx - window.start) as f64 / span;
            data.update(idx, metric::CPU_USAGE, |v| (v + ramp * progress).min(0.95));
            data.labels[idx] = Some(AttackKind::ResourceExhaustion);
        }
    }

    /// Full scenario: `days` of hourly data with three attacks at fixed
    /// positions of the timeline (25%, 60% and 80%)
    pub fn attack_scenario(&mut self, config: &SimulationConfig) -> Result<SimulatedDataset> {
        if config.days == 0 {
            return Err(PipelineError::invalid("simulation_days", "must be at least 1"));
        }
        let start = config
            .start
            .unwrap_or_else(|| current_hour() - Duration::days(config.days as i64));
        let points = config.days as usize * 24 + 1;

        let mut data = SimulatedDataset::unlabeled(self.generate_normal_traffic(start, points)?);
        let total = data.samples.len() as f64;

        self.inject_ddos(&mut data, (total * 0.25) as usize, 2);
        self.inject_brute_force(&mut data, (total * 0.6) as usize, 1);
        self.inject_resource_exhaustion(&mut data, (total * 0.8) as usize, 3);

        Ok(data)
    }

    /// Two hours of five-minute samples ending at `end`, the last few of
    /// which carry an extreme traffic burst
    pub fn burst_window(&mut self, end: DateTime<Utc>) -> Result<SimulatedDataset> {
        let start = end - Duration::minutes(5 * (BURST_WINDOW_POINTS as i64 - 1));
        let burst_start = BURST_WINDOW_POINTS - BURST_POINTS;

        let cpu = normal(0.3, 0.1)?;
        let network = normal(0.2, 0.05)?;
        let logins = poisson(5.0)?;
        let burst_cpu = normal(0.95, 0.02)?;
        let burst_network = normal(5.0, 0.1)?;
        let burst_logins = poisson(100.0)?;

        let mut samples = Vec::with_capacity(BURST_WINDOW_POINTS);
        let mut labels = Vec::with_capacity(BURST_WINDOW_POINTS);
        for i in 0..BURST_WINDOW_POINTS {
            let timestamp = start + Duration::minutes(5 * i as i64);
            let (c, n, l, label): (f64, f64, f64, _) = if i >= burst_start {
                (
                    burst_cpu.sample(&mut self.rng),
                    burst_network.sample(&mut self.rng),
                    burst_logins.sample(&mut self.rng),
                    Some(AttackKind::TrafficBurst),
                )
            } else {
                (
                    cpu.sample(&mut self.rng),
                    network.sample(&mut self.rng),
                    logins.sample(&mut self.rng),
                    None,
                )
            };
            samples.push(
                MetricSample::new(timestamp)
                    .with_reading(metric::CPU_USAGE, c.clamp(0.0, 1.0))
                    .with_reading(metric::NETWORK_TRAFFIC, n.clamp(0.0, 10.0))
                    .with_reading(metric::LOGIN_ATTEMPTS, l.clamp(0.0, 200.0)),
            );
            labels.push(label);
        }

        Ok(SimulatedDataset { samples, labels })
    }
}

/// Generate the reference attack scenario for a configuration
pub fn simulate(config: &SimulationConfig) -> Result<SimulatedDataset> {
    CloudSimulator::new(config.seed)
        .with_attack_intensity(config.attack_intensity)
        .attack_scenario(config)
}

fn current_hour() -> DateTime<Utc> {
    let now = Utc::now();
    now.duration_trunc(Duration::hours(1)).unwrap_or(now)
}

fn normal(mean: f64, std_dev: f64) -> Result<Normal<f64>> {
    Normal::new(mean, std_dev).map_err(|e| PipelineError::invalid("noise", e.to_string()))
}

fn poisson(lambda: f64) -> Result<Poisson<f64>> {
    Poisson::new(lambda).map_err(|e| PipelineError::invalid("noise", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_config() -> SimulationConfig {
        SimulationConfig {
            days: 2,
            attack_intensity: 1.0,
            seed: 7,
            start: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    #[test]
    fn test_scenario_length_and_spacing() {
        let data = simulate(&fixed_config()).unwrap();
        assert_eq!(data.samples.len(), 49);
        assert_eq!(data.labels.len(), 49);
        for pair in data.samples.windows(2) {
            assert_eq!(pair[1].timestamp - pair[0].timestamp, Duration::hours(1));
        }
    }

    #[test]
    fn test_same_seed_same_data() {
        let a = simulate(&fixed_config()).unwrap();
        let b = simulate(&fixed_config()).unwrap();
        assert_eq!(a.samples, b.samples);
        assert_eq!(a.labels, b.labels);

        let c = simulate(&SimulationConfig {
            seed: 8,
            ..fixed_config()
        })
        .unwrap();
        assert_ne!(a.samples, c.samples);
    }

    #[test]
    fn test_attacks_are_labelled() {
        let data = simulate(&fixed_config()).unwrap();
        // 2h DDoS + 1h brute force + 3h exhaustion
        assert_eq!(data.attack_count(), 6);
        assert_eq!(data.labels[12], Some(AttackKind::Ddos));
        assert_eq!(data.labels[29], Some(AttackKind::BruteForce));
        assert_eq!(data.labels[39], Some(AttackKind::ResourceExhaustion));
    }

    #[test]
    fn test_readings_stay_in_range() {
        let data = simulate(&fixed_config()).unwrap();
        for sample in &data.samples {
            let cpu = sample.get(metric::CPU_USAGE).unwrap();
            let net = sample.get(metric::NETWORK_TRAFFIC).unwrap();
            let logins = sample.get(metric::LOGIN_ATTEMPTS).unwrap();
            assert!((0.0..=1.0).contains(&cpu));
            assert!((0.0..=1.0).contains(&net));
            assert!(logins >= 0.0);
        }
    }

    #[test]
    fn test_brute_force_raises_logins() {
        let config = fixed_config();
        let mut sim = CloudSimulator::new(config.seed);
        let baseline = sim
            .generate_normal_traffic(config.start.unwrap(), 10)
            .unwrap();
        let mut data = SimulatedDataset::unlabeled(baseline.clone());
        sim.inject_brute_force(&mut data, 3, 1);

        let before = baseline[3].get(metric::LOGIN_ATTEMPTS).unwrap();
        let after = data.samples[3].get(metric::LOGIN_ATTEMPTS).unwrap();
        assert!((after - before - 50.0).abs() < 1e-9);
        assert_eq!(data.samples[4], baseline[4]);
    }

    #[test]
    fn test_zero_intensity_leaves_readings_unchanged() {
        let config = fixed_config();
        let mut sim = CloudSimulator::new(config.seed).with_attack_intensity(0.0);
        let baseline = sim
            .generate_normal_traffic(config.start.unwrap(), 10)
            .unwrap();
        let mut data = SimulatedDataset::unlabeled(baseline.clone());
        sim.inject_ddos(&mut data, 2, 2);
        sim.inject_resource_exhaustion(&mut data, 5, 3);
        assert_eq!(data.samples, baseline);
        assert_eq!(data.attack_count(), 5);
    }

    #[test]
    fn test_attack_window_clamped_to_dataset() {
        let config = fixed_config();
        let mut sim = CloudSimulator::new(config.seed);
        let baseline = sim
            .generate_normal_traffic(config.start.unwrap(), 5)
            .unwrap();
        let mut data = SimulatedDataset::unlabeled(baseline);
        sim.inject_ddos(&mut data, 4, 10);
        sim.inject_brute_force(&mut data, 20, 1);
        assert_eq!(data.attack_count(), 1);
    }

    #[test]
    fn test_burst_window_shape() {
        let end = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let data = CloudSimulator::new(1).burst_window(end).unwrap();
        assert_eq!(data.samples.len(), BURST_WINDOW_POINTS);
        assert_eq!(data.samples.last().unwrap().timestamp, end);
        assert_eq!(data.attack_count(), BURST_POINTS);

        let last = data.samples.last().unwrap();
        assert!(last.get(metric::CPU_USAGE).unwrap() > 0.8);
        assert!(last.get(metric::NETWORK_TRAFFIC).unwrap() > 2.0);
    }

    #[test]
    fn test_zero_days_rejected() {
        let config = SimulationConfig {
            days: 0,
            ..fixed_config()
        };
        assert!(simulate(&config).is_err());
    }
}
