//! Local stand-in for the remote analysis service.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reward_lens_core::{AnalysisRequest, AnalysisResult, DEFAULT_BOUNDING_BOX, StarRange, TaskType};

/// Artificial latency applied by [`Simulator::simulate`] unless overridden.
pub const DEFAULT_SIMULATED_DELAY: Duration = Duration::from_millis(1_500);

const UPPER_HALF_PROBABILITY: f64 = 0.75;

const GENERAL_MESSAGES: [&str; 4] = [
    "What a bright smile, thank you for lighting up the class!",
    "Your uniform looks so neat today, well done!",
    "Thank you for helping your classmates, true star!",
    "Great participation today, keep raising that hand!",
];

const ACADEMIC_MESSAGES: [&str; 4] = [
    "Such neat handwriting, every letter is clear!",
    "Careful and correct work, your focus really shows!",
    "Beautifully organized page, excellent effort!",
    "Your reading practice is paying off, superb!",
];

const CREATIVE_MESSAGES: [&str; 4] = [
    "Wonderful colors, your art is full of life!",
    "What a creative idea, truly one of a kind!",
    "Your imagination shines in every detail!",
    "Lovely composition, you are a real artist!",
];

/// Fixed message templates for one task type.
pub fn fallback_messages(task: TaskType) -> &'static [&'static str] {
    match task {
        TaskType::General => &GENERAL_MESSAGES,
        TaskType::Academic => &ACADEMIC_MESSAGES,
        TaskType::Creative => &CREATIVE_MESSAGES,
    }
}

/// Produces plausible detected results without network access.
#[derive(Debug)]
pub struct Simulator {
    delay: Duration,
    rng: Mutex<StdRng>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new(DEFAULT_SIMULATED_DELAY)
    }
}

impl Simulator {
    /// Creates a simulator with OS-seeded randomness.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Creates a deterministic simulator.
    pub fn with_seed(delay: Duration, seed: u64) -> Self {
        Self {
            delay,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Configured artificial delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits for the artificial delay, then produces a result.
    pub async fn simulate(&self, request: &AnalysisRequest) -> AnalysisResult {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.simulate_now(request)
    }

    /// Produces a result immediately.
    ///
    /// Stars fall in the upper half of the range three times out of four.
    pub fn simulate_now(&self, request: &AnalysisRequest) -> AnalysisResult {
        let range = request.star_range();
        let templates = fallback_messages(request.task_type());

        let (stars, index) = match self.rng.lock() {
            Ok(mut rng) => (
                biased_stars(&mut *rng, range),
                rng.random_range(0..templates.len()),
            ),
            Err(_) => (range.max(), 0),
        };

        AnalysisResult {
            detected: true,
            message: templates[index].to_string(),
            stars,
            bounding_box: Some(DEFAULT_BOUNDING_BOX),
        }
    }
}

fn biased_stars<R: Rng + ?Sized>(rng: &mut R, range: StarRange) -> u8 {
    let (min, max) = (range.min(), range.max());
    let upper_start = min + (max - min + 1) / 2;
    if upper_start > max || !rng.random_bool(UPPER_HALF_PROBABILITY) {
        return rng.random_range(min..=max);
    }
    rng.random_range(upper_start..=max)
}

#[cfg(test)]
mod tests {
    //! Unit tests for the simulated score distribution.

    use super::*;

    #[test]
    fn stars_stay_in_range_and_lean_high() {
        let mut rng = StdRng::seed_from_u64(7);
        let range = StarRange::new(1, 5).unwrap();
        let mut upper = 0;
        for _ in 0..2_000 {
            let stars = biased_stars(&mut rng, range);
            assert!(range.contains(stars));
            if stars >= 3 {
                upper += 1;
            }
        }
        // Expected share is 0.75 + 0.25 * 0.6 = 0.9.
        assert!(upper > 1_600, "upper half hits: {upper}");
    }

    #[test]
    fn single_value_range_is_constant() {
        let mut rng = StdRng::seed_from_u64(1);
        let range = StarRange::new(4, 4).unwrap();
        for _ in 0..50 {
            assert_eq!(biased_stars(&mut rng, range), 4);
        }
    }

    #[test]
    fn every_task_has_templates() {
        for task in [TaskType::General, TaskType::Academic, TaskType::Creative] {
            assert!(!fallback_messages(task).is_empty());
        }
    }
}
