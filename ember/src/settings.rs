use crate::error::*;

pub const MAX_FILTER_ITERATIONS: u32 = 5;
pub const ALPHA_RANGE: (f32, f32) = (0.01, 1.0);
pub const ANTILAG_SCALE_RANGE: (f32, f32) = (0.0, 8.0);

/// Tunables of the denoising pipeline, snapshotted at the start of each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    pub alpha: f32,
    pub moments_alpha: f32,
    pub filter_iterations: u32,
    pub adaptive: bool,
    pub antilag_scale: f32,
    pub gradient_scale: f32,
    pub sigma_luminance: f32,
    pub sigma_depth: f32,
    pub sigma_normal: f32,
    pub depth_threshold: f32,
    pub normal_threshold: f32,
    pub max_history_length: u32,
    pub max_bounces: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            moments_alpha: 0.2,
            filter_iterations: 4,
            adaptive: true,
            antilag_scale: 1.0,
            gradient_scale: 1.0,
            sigma_luminance: 4.0,
            sigma_depth: 1.0,
            sigma_normal: 128.0,
            depth_threshold: 0.1,
            normal_threshold: 0.9,
            max_history_length: 32,
            max_bounces: 4,
        }
    }
}

impl RenderSettings {
    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f32, (lo, hi): (f32, f32)| v >= lo && v <= hi;
        if !in_range(self.alpha, ALPHA_RANGE) || !in_range(self.moments_alpha, ALPHA_RANGE) {
            return Err(Error::InvalidSettings(format!(
                "blend weights must be in [{}, {}]",
                ALPHA_RANGE.0, ALPHA_RANGE.1
            )));
        }
        if self.filter_iterations > MAX_FILTER_ITERATIONS {
            return Err(Error::InvalidSettings(format!(
                "at most {} filter iterations are supported",
                MAX_FILTER_ITERATIONS
            )));
        }
        if !in_range(self.antilag_scale, ANTILAG_SCALE_RANGE) {
            return Err(Error::InvalidSettings("antilag scale out of range".to_owned()));
        }
        if self.max_history_length == 0 {
            return Err(Error::InvalidSettings("history length cap must be non-zero".to_owned()));
        }
        if self.max_bounces == 0 {
            return Err(Error::InvalidSettings("at least one bounce is required".to_owned()));
        }
        Ok(())
    }

    pub fn adjust_alpha(&mut self, delta: f32) {
        self.alpha = (self.alpha + delta).max(ALPHA_RANGE.0).min(ALPHA_RANGE.1);
    }

    pub fn adjust_filter_iterations(&mut self, delta: i32) {
        let value = self.filter_iterations as i32 + delta;
        self.filter_iterations = value.max(0).min(MAX_FILTER_ITERATIONS as i32) as u32;
    }

    pub fn adjust_antilag_scale(&mut self, delta: f32) {
        self.antilag_scale = (self.antilag_scale + delta)
            .max(ANTILAG_SCALE_RANGE.0)
            .min(ANTILAG_SCALE_RANGE.1);
    }

    pub fn toggle_adaptive(&mut self) {
        self.adaptive = !self.adaptive;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RenderSettings::default().validate().is_ok());
    }

    #[test]
    fn iterations_clamp_to_supported_range() {
        let mut settings = RenderSettings::default();
        settings.adjust_filter_iterations(10);
        assert_eq!(settings.filter_iterations, MAX_FILTER_ITERATIONS);
        settings.adjust_filter_iterations(-10);
        assert_eq!(settings.filter_iterations, 0);
        settings.adjust_filter_iterations(-1);
        assert_eq!(settings.filter_iterations, 0);
    }

    #[test]
    fn alpha_and_antilag_clamp() {
        let mut settings = RenderSettings::default();
        settings.adjust_alpha(-1.0);
        assert_eq!(settings.alpha, ALPHA_RANGE.0);
        settings.adjust_alpha(5.0);
        assert_eq!(settings.alpha, ALPHA_RANGE.1);
        settings.adjust_antilag_scale(-2.0);
        assert_eq!(settings.antilag_scale, 0.0);
    }

    #[test]
    fn out_of_range_settings_are_rejected() {
        let settings = RenderSettings {
            filter_iterations: 6,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(Error::InvalidSettings(_))));
    }
}
