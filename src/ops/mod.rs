pub mod motion;
pub mod optim;
pub mod postprocess;
pub mod resample;
pub mod tracking;

/// Scale a radius given for a 512px image to `resolution`, rounding halves
/// to even.
pub fn scaled_radius(radius: f32, resolution: usize) -> usize {
    (radius / 512.0 * resolution as f32).round_ties_even().max(0.0) as usize
}

#[cfg(test)]
mod tests {
    use super::scaled_radius;

    #[test]
    fn radii_follow_resolution() {
        assert_eq!(scaled_radius(12.0, 512), 12);
        assert_eq!(scaled_radius(12.0, 256), 6);
        assert_eq!(scaled_radius(3.0, 256), 2);
        assert_eq!(scaled_radius(3.0, 1024), 6);
        // 0.5 rounds to even
        assert_eq!(scaled_radius(2.0, 128), 0);
    }
}
