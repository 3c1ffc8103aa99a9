//! One engine instance per configured widget.
//!
//! An engine owns everything a widget needs across scan cycles and runs one
//! full cycle per call: detect, interpolate, and for touchpads reconcile
//! and report. Widgets never share state, so the scheduler can process them
//! in any order.

use heapless::Vec;

use crate::centroid;
use crate::detect::{self, MAX_SLIDER_CENTROIDS, PadFrame, SliderMax};
use crate::filter::{FilterKind, FilterStage, ReportSlot};
use crate::tracker::{MAX_TOUCHES, TouchSet, TouchTracker, TrackerConfig};

#[derive(Debug, Clone)]
pub enum SliderKind {
    Linear,
    Radial,
    /// Logical-position remap for interleaved sensors; the table is twice
    /// the physical sensor count.
    Diplex(std::vec::Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct SliderParams {
    pub sensor_count: usize,
    pub kind: SliderKind,
    pub finger_threshold: u16,
    /// `resolution * 256 / (sensor_count - 1)` for linear widgets,
    /// `resolution * 256 / sensor_count` for radial ones.
    pub multiplier: u32,
    pub multi_centroid: bool,
}

pub struct SliderEngine {
    pub params: SliderParams,
}

impl SliderEngine {
    pub fn new(params: SliderParams) -> Self {
        Self { params }
    }

    /// One scan cycle: detect, interpolate, done. 1-D widgets carry no
    /// cross-cycle state.
    pub fn process(&self, diff: &[u16]) -> Vec<u16, MAX_SLIDER_CENTROIDS> {
        let p = &self.params;
        match &p.kind {
            SliderKind::Linear => {
                let maxima = self.slider_maxima(diff);
                centroid::linear_positions(&maxima, p.multiplier, p.sensor_count)
            }
            SliderKind::Radial => {
                let maxima = self.slider_maxima(diff);
                centroid::radial_positions(&maxima, p.multiplier, p.sensor_count)
            }
            SliderKind::Diplex(table) => {
                let mut maxima: Vec<SliderMax, MAX_SLIDER_CENTROIDS> = Vec::new();
                if let Some(m) = detect::find_diplex_max(diff, table, p.finger_threshold) {
                    let _ = maxima.push(m);
                }
                // positions live on the virtual array, twice the strip
                centroid::linear_positions(&maxima, p.multiplier, table.len())
            }
        }
    }

    fn slider_maxima(&self, diff: &[u16]) -> Vec<SliderMax, MAX_SLIDER_CENTROIDS> {
        if self.params.multi_centroid {
            detect::find_slider_maxima(diff, self.params.finger_threshold)
        } else {
            let mut maxima = Vec::new();
            if let Some(m) = detect::find_slider_max(diff, self.params.finger_threshold) {
                let _ = maxima.push(m);
            }
            maxima
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PadParams {
    pub cols: usize,
    pub rows: usize,
    pub x_multiplier: u32,
    pub y_multiplier: u32,
    pub tracking: TrackerConfig,
}

pub struct PadEngine {
    pub params: PadParams,
    tracker: TouchTracker,
    filter: FilterStage,
}

impl PadEngine {
    pub fn new(params: PadParams, filter_kind: FilterKind, iir_coeff: u8) -> Self {
        Self {
            params,
            tracker: TouchTracker::new(),
            filter: FilterStage::new(filter_kind, iir_coeff),
        }
    }

    /// One scan cycle: detect, interpolate, reconcile against the previous
    /// cycle, then filter into the report slots.
    pub fn process(&mut self, diff: &[u16]) -> &[ReportSlot; MAX_TOUCHES] {
        let p = self.params;
        let frame = PadFrame::new(diff, p.cols, p.rows);
        let peaks =
            detect::find_pad_maxima(&frame, p.tracking.finger_threshold, p.tracking.hysteresis);
        let mut new: TouchSet =
            centroid::pad_centroids(&frame, &peaks, p.x_multiplier, p.y_multiplier);
        self.tracker.track(&mut new, &p.tracking);
        self.filter.filter_and_report(self.tracker.touches());
        self.filter.slots()
    }

    /// Tracked touches behind the report, age-sorted.
    pub fn touches(&self) -> &[crate::tracker::TouchRecord] {
        self.tracker.touches()
    }

    pub fn reset(&mut self) {
        self.tracker.reset();
        self.filter.reset();
    }
}

pub enum WidgetEngine {
    Slider(SliderEngine),
    Pad(PadEngine),
}

impl WidgetEngine {
    /// Sensor values one frame for this widget must carry.
    pub fn expected_len(&self) -> usize {
        match self {
            WidgetEngine::Slider(s) => s.params.sensor_count,
            WidgetEngine::Pad(p) => p.params.cols * p.params.rows,
        }
    }
}
