//! Automatable audio parameters
//!
//! Every gain, frequency and threshold in the graph is an [`AudioParam`].
//! Changes are scheduled on the graph clock rather than written directly so
//! that gains glide instead of stepping (no zipper noise, no clicks).
//!
//! A parameter holds one active automation segment. Scheduling a new
//! segment starts from the value the old one had reached at that moment, so
//! the most recent call always wins and the curve never jumps.
//!
//! ```rust
//! use auris::engine::param::AudioParam;
//!
//! let mut gain = AudioParam::new("gain", 1.0, 0.0, 10.0);
//! gain.set_target_at_time(2.0, 0.0, 0.05);
//! assert!(gain.value_at(0.05) > 1.6);
//! assert_eq!(gain.final_value(), 2.0);
//! ```

/// Time constants this far past the start count as settled
const SETTLE_TIME_CONSTANTS: f64 = 12.0;

/// One scheduled automation segment
#[derive(Debug, Clone, Copy, PartialEq)]
enum Automation {
    /// Constant value
    Hold { value: f32 },
    /// Instant change at `time`
    Step { time: f64, from: f32, to: f32 },
    /// Straight line between two points
    Linear {
        start_time: f64,
        start_value: f32,
        end_time: f64,
        end_value: f32,
    },
    /// Exponential approach towards `target`
    Target {
        start_time: f64,
        start_value: f32,
        target: f32,
        time_constant: f64,
    },
}

/// A single automatable parameter
#[derive(Debug, Clone)]
pub struct AudioParam {
    name: &'static str,
    default_value: f32,
    min: f32,
    max: f32,
    automation: Automation,
}

impl AudioParam {
    /// Create a parameter with a nominal range
    ///
    /// # Arguments
    /// * `name` - Identifier used in logs
    /// * `default_value` - Initial value
    /// * `min` / `max` - Nominal range; scheduled values are clamped into it
    pub fn new(name: &'static str, default_value: f32, min: f32, max: f32) -> Self {
        let default_value = default_value.clamp(min, max);
        Self {
            name,
            default_value,
            min,
            max,
            automation: Automation::Hold {
                value: default_value,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_value(&self) -> f32 {
        self.default_value
    }

    /// Nominal range as `(min, max)`
    pub fn range(&self) -> (f32, f32) {
        (self.min, self.max)
    }

    fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.final_value();
        }
        value.clamp(self.min, self.max)
    }

    /// Overwrite the parameter immediately, dropping any automation
    pub fn set_value(&mut self, value: f32) {
        let value = self.clamp(value);
        self.automation = Automation::Hold { value };
    }

    /// Jump to `value` at `time`
    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        let to = self.clamp(value);
        let from = self.value_at(time);
        self.automation = Automation::Step { time, from, to };
    }

    /// Ramp linearly from the value at `now` to `value`, arriving at `end_time`
    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, end_time: f64, now: f64) {
        let end_value = self.clamp(value);
        let start_value = self.value_at(now);
        if end_time <= now {
            self.automation = Automation::Hold { value: end_value };
            return;
        }
        self.automation = Automation::Linear {
            start_time: now,
            start_value,
            end_time,
            end_value,
        };
    }

    /// Approach `target` exponentially from `start_time` with time constant `time_constant`
    ///
    /// A non-positive time constant is an immediate change.
    pub fn set_target_at_time(&mut self, target: f32, start_time: f64, time_constant: f64) {
        let target = self.clamp(target);
        if time_constant <= 0.0 {
            self.set_value_at_time(target, start_time);
            return;
        }
        let start_value = self.value_at(start_time);
        self.automation = Automation::Target {
            start_time,
            start_value,
            target,
            time_constant,
        };
    }

    /// Freeze the parameter at whatever value it has at `now`
    pub fn cancel_scheduled_values(&mut self, now: f64) {
        let value = self.value_at(now);
        self.automation = Automation::Hold { value };
    }

    /// Value of the parameter at graph time `t`
    pub fn value_at(&self, t: f64) -> f32 {
        match self.automation {
            Automation::Hold { value } => value,
            Automation::Step { time, from, to } => {
                if t < time {
                    from
                } else {
                    to
                }
            }
            Automation::Linear {
                start_time,
                start_value,
                end_time,
                end_value,
            } => {
                if t <= start_time {
                    start_value
                } else if t >= end_time {
                    end_value
                } else {
                    let frac = ((t - start_time) / (end_time - start_time)) as f32;
                    start_value + (end_value - start_value) * frac
                }
            }
            Automation::Target {
                start_time,
                start_value,
                target,
                time_constant,
            } => {
                if t <= start_time {
                    start_value
                } else {
                    let elapsed = t - start_time;
                    if elapsed >= time_constant * SETTLE_TIME_CONSTANTS {
                        target
                    } else {
                        let decay = (-elapsed / time_constant).exp() as f32;
                        target + (start_value - target) * decay
                    }
                }
            }
        }
    }

    /// The value the current automation settles on
    pub fn final_value(&self) -> f32 {
        match self.automation {
            Automation::Hold { value } => value,
            Automation::Step { to, .. } => to,
            Automation::Linear { end_value, .. } => end_value,
            Automation::Target { target, .. } => target,
        }
    }

    /// True once no further change happens after `t`
    pub fn is_settled_at(&self, t: f64) -> bool {
        match self.automation {
            Automation::Hold { .. } => true,
            Automation::Step { time, .. } => t >= time,
            Automation::Linear { end_time, .. } => t >= end_time,
            Automation::Target {
                start_time,
                time_constant,
                ..
            } => t - start_time >= time_constant * SETTLE_TIME_CONSTANTS,
        }
    }

    /// Fill `out` with per-sample values starting at `start_time`
    pub fn fill(&self, start_time: f64, sample_rate: u32, out: &mut [f32]) {
        if self.is_settled_at(start_time) {
            let value = self.final_value();
            out.iter_mut().for_each(|v| *v = value);
            return;
        }
        let dt = 1.0 / sample_rate as f64;
        for (i, v) in out.iter_mut().enumerate() {
            *v = self.value_at(start_time + i as f64 * dt);
        }
    }
}
