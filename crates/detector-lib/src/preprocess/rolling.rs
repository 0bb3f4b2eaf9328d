//! Count-based rolling statistics

use std::collections::VecDeque;

/// Fixed-length window over the most recent values.
///
/// Until the window is full, statistics cover whatever has been pushed.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Sample variance (Bessel's correction); zero below two values
    pub fn variance(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_window_uses_available_values() {
        let mut window = RollingWindow::new(5);
        window.push(2.0);
        assert_eq!(window.mean(), 2.0);
        assert_eq!(window.variance(), 0.0);

        window.push(4.0);
        assert_eq!(window.mean(), 3.0);
        assert_eq!(window.variance(), 2.0);
    }

    #[test]
    fn test_old_values_expire() {
        let mut window = RollingWindow::new(3);
        for v in [100.0, 1.0, 2.0, 3.0] {
            window.push(v);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.mean(), 2.0);
        assert_eq!(window.variance(), 1.0);
    }

    #[test]
    fn test_zero_capacity_behaves_as_one() {
        let mut window = RollingWindow::new(0);
        window.push(1.0);
        window.push(7.0);
        assert_eq!(window.len(), 1);
        assert_eq!(window.mean(), 7.0);
    }
}
