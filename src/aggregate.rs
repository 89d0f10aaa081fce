//! Sliding-window aggregation of per-frame flux into one leakage rate.
//!
//! Windowed mean-relative gating: every `frames_per_group` samples, once
//! `window_size` samples exist, the trailing window is averaged per quality
//! metric and only samples at or above all three averages contribute to
//! that window's estimate. The threshold is the window's own mean, so the
//! filter adapts to whatever quality level the recording reaches. The final
//! rate is the mean of all window estimates.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::quality::FrameQualityMetrics;

/// Absorbs summation rounding when a sample equals the window mean.
const MEAN_TOLERANCE: f64 = 1e-12;

/// One frame that passed the fragmentation gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FluxSample {
    /// Position of the frame in the ordered CL sequence.
    pub frame_index: usize,
    /// Flux in kg/h; `None` when it could not be computed.
    pub flux: Option<f64>,
    pub metrics: FrameQualityMetrics,
}

/// Estimate produced by one window evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowEstimate {
    /// `(frame_index + 1) · frame_interval` of the window's last frame (s).
    pub time_s: f64,
    pub frame_index: usize,
    /// Samples that passed the gate.
    pub accepted: usize,
    pub value_kg_h: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    pub window_size: usize,
    pub frames_per_group: usize,
    /// Frame interval (s) used for window timestamps.
    pub frame_interval_s: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window_size: 30,
            frames_per_group: 3,
            frame_interval_s: 0.04,
        }
    }
}

/// Sequential, order-dependent aggregator. Feed samples in frame order.
#[derive(Debug, Clone)]
pub struct TemporalAggregator {
    config: AggregatorConfig,
    samples: Vec<FluxSample>,
    estimates: Vec<WindowEstimate>,
}

impl TemporalAggregator {
    pub fn new(config: AggregatorConfig) -> Result<Self> {
        if config.window_size == 0 || config.frames_per_group == 0 {
            return Err(EngineError::InvalidInput(format!(
                "window size ({}) and frames per group ({}) must be positive",
                config.window_size, config.frames_per_group
            )));
        }
        Ok(Self {
            config,
            samples: Vec::new(),
            estimates: Vec::new(),
        })
    }

    /// Append a sample; returns the window estimate if this sample closed
    /// a window that produced one.
    pub fn push(&mut self, sample: FluxSample) -> Option<WindowEstimate> {
        self.samples.push(sample);
        let n = self.samples.len();
        let AggregatorConfig {
            window_size,
            frames_per_group,
            ..
        } = self.config;
        if n < window_size || (n - window_size) % frames_per_group != 0 {
            return None;
        }

        let estimate = self.evaluate_window(&self.samples[n - window_size..])?;
        log::debug!(
            "window ending at frame {}: {:.4} kg/h from {} samples",
            estimate.frame_index,
            estimate.value_kg_h,
            estimate.accepted
        );
        self.estimates.push(estimate);
        Some(estimate)
    }

    fn evaluate_window(&self, window: &[FluxSample]) -> Option<WindowEstimate> {
        let len = window.len() as f64;
        let mean_cl = window.iter().map(|s| s.metrics.cl_valid_ratio).sum::<f64>() / len;
        let mean_flow = window.iter().map(|s| s.metrics.flow_valid_ratio).sum::<f64>() / len;
        let mean_iou = window.iter().map(|s| s.metrics.iou).sum::<f64>() / len;

        let at_or_above = |value: f64, mean: f64| value >= mean - MEAN_TOLERANCE * mean.abs().max(1.0);
        let accepted: Vec<f64> = window
            .iter()
            .filter(|s| {
                at_or_above(s.metrics.cl_valid_ratio, mean_cl)
                    && at_or_above(s.metrics.flow_valid_ratio, mean_flow)
                    && at_or_above(s.metrics.iou, mean_iou)
            })
            .filter_map(|s| s.flux)
            .collect();
        if accepted.is_empty() {
            return None;
        }

        let last = window.last()?;
        Some(WindowEstimate {
            time_s: (last.frame_index + 1) as f64 * self.config.frame_interval_s,
            frame_index: last.frame_index,
            accepted: accepted.len(),
            value_kg_h: accepted.iter().sum::<f64>() / accepted.len() as f64,
        })
    }

    pub fn samples(&self) -> &[FluxSample] {
        &self.samples
    }

    pub fn estimates(&self) -> &[WindowEstimate] {
        &self.estimates
    }

    /// Mean of all window estimates, `None` if no window produced one.
    pub fn leakage(&self) -> Option<f64> {
        if self.estimates.is_empty() {
            return None;
        }
        Some(self.estimates.iter().map(|e| e.value_kg_h).sum::<f64>() / self.estimates.len() as f64)
    }

    /// Like [`leakage`](Self::leakage) but explains a missing estimate.
    pub fn require_leakage(&self) -> Result<f64> {
        self.leakage().ok_or(EngineError::InsufficientFrames {
            available: self.samples.len(),
            required: self.config.window_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn metrics(cl: f64, flow: f64, iou: f64) -> FrameQualityMetrics {
        FrameQualityMetrics {
            fragmentation: 0.0,
            cl_valid_ratio: cl,
            flow_valid_ratio: flow,
            iou,
        }
    }

    fn sample(frame_index: usize, flux: Option<f64>, m: FrameQualityMetrics) -> FluxSample {
        FluxSample {
            frame_index,
            flux,
            metrics: m,
        }
    }

    fn aggregator(window_size: usize, frames_per_group: usize) -> TemporalAggregator {
        TemporalAggregator::new(AggregatorConfig {
            window_size,
            frames_per_group,
            frame_interval_s: 0.04,
        })
        .unwrap()
    }

    #[test]
    fn constant_sequence_reproduces_constant_flux() {
        let mut agg = aggregator(30, 3);
        for i in 0..40 {
            agg.push(sample(i, Some(2.0), metrics(0.37, 0.41, 0.29)));
        }
        // Windows close at 30, 33, 36 and 39 samples.
        assert_eq!(agg.estimates().len(), 4);
        assert_relative_eq!(agg.leakage().unwrap(), 2.0);
    }

    #[test]
    fn windows_close_on_group_boundaries() {
        let mut agg = aggregator(5, 2);
        let closed: Vec<usize> = (0..10)
            .filter_map(|i| agg.push(sample(i, Some(1.0), metrics(0.5, 0.5, 0.5))))
            .map(|e| e.frame_index)
            .collect();
        assert_eq!(closed, vec![4, 6, 8]);
        assert_relative_eq!(agg.estimates()[0].time_s, 0.2);
    }

    #[test]
    fn below_average_frames_are_gated_out() {
        let mut agg = aggregator(4, 1);
        agg.push(sample(0, Some(1.0), metrics(0.9, 0.9, 0.9)));
        agg.push(sample(1, Some(1.0), metrics(0.9, 0.9, 0.9)));
        agg.push(sample(2, Some(100.0), metrics(0.9, 0.1, 0.9)));
        let e = agg.push(sample(3, Some(3.0), metrics(0.9, 0.9, 0.9))).unwrap();
        assert_eq!(e.accepted, 3);
        assert_relative_eq!(e.value_kg_h, 5.0 / 3.0);
    }

    #[test]
    fn missing_flux_counts_for_metrics_only() {
        let mut agg = aggregator(3, 1);
        agg.push(sample(0, None, metrics(1.0, 1.0, 1.0)));
        agg.push(sample(1, Some(4.0), metrics(1.0, 1.0, 1.0)));
        let e = agg.push(sample(2, Some(2.0), metrics(1.0, 1.0, 1.0))).unwrap();
        assert_eq!(e.accepted, 2);
        assert_relative_eq!(e.value_kg_h, 3.0);
    }

    #[test]
    fn window_without_flux_yields_nothing() {
        let mut agg = aggregator(2, 1);
        agg.push(sample(0, None, metrics(0.5, 0.5, 0.5)));
        assert!(agg.push(sample(1, None, metrics(0.5, 0.5, 0.5))).is_none());
        assert_eq!(agg.leakage(), None);
    }

    #[test]
    fn too_few_samples_is_insufficient() {
        let mut agg = aggregator(30, 3);
        for i in 0..10 {
            agg.push(sample(i, Some(1.0), metrics(0.5, 0.5, 0.5)));
        }
        assert!(matches!(
            agg.require_leakage(),
            Err(EngineError::InsufficientFrames {
                available: 10,
                required: 30
            })
        ));
    }

    #[test]
    fn timestamps_follow_sequence_position() {
        // Skipped frames leave gaps in frame_index; time uses the index.
        let mut agg = aggregator(2, 1);
        agg.push(sample(3, Some(1.0), metrics(0.5, 0.5, 0.5)));
        let e = agg.push(sample(7, Some(1.0), metrics(0.5, 0.5, 0.5))).unwrap();
        assert_relative_eq!(e.time_s, 8.0 * 0.04);
    }

    #[test]
    fn zero_sized_window_is_rejected() {
        assert!(TemporalAggregator::new(AggregatorConfig {
            window_size: 0,
            ..AggregatorConfig::default()
        })
        .is_err());
    }
}
