//! Stateless short-code generation and code-space statistics.

use crate::config::CodeConfig;
use serde::Serialize;
use std::collections::HashSet;
use tracing::warn;

/// Draw attempts allowed per requested code before giving up.
const ATTEMPT_FACTOR: usize = 10;

/// Progress report emitted after each generation chunk.
#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub generated_so_far: usize,
    pub percentage: f64,
}

/// Code-space statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CodeSpaceStats {
    pub max_codes: f64,
    pub used_codes: u64,
    pub remaining_codes: f64,
    pub utilization_percentage: f64,
    pub collision_probability: f64,
}

/// Generates fixed-length short codes from a configured alphabet.
///
/// Pure functions over configuration plus randomness. Single calls carry no
/// uniqueness guarantee; batch calls deduplicate within the call and against
/// a caller-supplied exclusion set.
pub struct CodeGenerator {
    charset: Vec<char>,
    charset_index: HashSet<char>,
    length: usize,
}

impl CodeGenerator {
    pub fn new(config: &CodeConfig) -> Self {
        let charset: Vec<char> = config.charset.chars().collect();
        let charset_index = charset.iter().copied().collect();
        Self {
            charset,
            charset_index,
            length: config.length,
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Generate a single code: `length` independent uniform draws from the
    /// charset. No uniqueness guarantee.
    pub fn generate_one(&self) -> String {
        nanoid::format(nanoid::rngs::default, &self.charset, self.length)
    }

    /// Generate up to `count` unique codes, skipping anything in `exclude`.
    ///
    /// Gives up after `10 x count` draws so a nearly exhausted code space
    /// cannot loop forever. Callers must check the returned length; a short
    /// result is not an error.
    pub fn generate_many(&self, count: usize, exclude: &HashSet<String>) -> Vec<String> {
        let mut codes = Vec::with_capacity(count);
        let mut seen: HashSet<String> = HashSet::with_capacity(count);
        let max_attempts = count.saturating_mul(ATTEMPT_FACTOR);
        let mut attempts = 0;

        while codes.len() < count && attempts < max_attempts {
            attempts += 1;
            let code = self.generate_one();
            if exclude.contains(&code) || seen.contains(&code) {
                continue;
            }
            seen.insert(code.clone());
            codes.push(code);
        }

        if codes.len() < count {
            warn!(
                requested = count,
                generated = codes.len(),
                attempts,
                "code generation attempt budget exhausted, returning partial batch"
            );
        }

        codes
    }

    /// Generate `total_count` unique codes in chunks, yielding to the
    /// scheduler between chunks so a large population run does not starve
    /// other tasks. The exclusion set accumulates across chunks, so no
    /// duplicate crosses a chunk boundary.
    pub async fn generate_batch<F>(
        &self,
        total_count: usize,
        exclude: &HashSet<String>,
        chunk_size: usize,
        mut on_progress: F,
    ) -> Vec<String>
    where
        F: FnMut(BatchProgress),
    {
        let chunk_size = chunk_size.max(1);
        let total_chunks = total_count.div_ceil(chunk_size);
        let mut running_exclude = exclude.clone();
        let mut codes = Vec::with_capacity(total_count);

        for chunk_index in 0..total_chunks {
            let remaining = total_count - codes.len();
            let chunk = self.generate_many(remaining.min(chunk_size), &running_exclude);
            let shortfall = chunk.len() < remaining.min(chunk_size);

            running_exclude.extend(chunk.iter().cloned());
            codes.extend(chunk);

            on_progress(BatchProgress {
                chunk_index,
                total_chunks,
                generated_so_far: codes.len(),
                percentage: if total_count == 0 {
                    100.0
                } else {
                    codes.len() as f64 / total_count as f64 * 100.0
                },
            });

            // A short chunk means the attempt budget ran dry; later chunks
            // would only burn the same budget again.
            if shortfall {
                break;
            }

            tokio::task::yield_now().await;
        }

        codes
    }

    /// True iff `code` has exactly the configured length and every character
    /// belongs to the configured charset.
    pub fn is_valid_code(&self, code: &str) -> bool {
        code.chars().count() == self.length
            && code.chars().all(|c| self.charset_index.contains(&c))
    }

    /// Total size of the code space: `charset_len ^ length`.
    pub fn max_codes(&self) -> f64 {
        (self.charset.len() as f64).powi(self.length as i32)
    }

    /// Birthday-paradox approximation `1 - e^(-n(n-1)/2M)` of the chance
    /// that at least two of `issued_count` random codes collide. Saturates
    /// at 1 once the code space is exhausted.
    pub fn estimate_collision_probability(&self, issued_count: u64) -> f64 {
        let m = self.max_codes();
        let n = issued_count as f64;
        if n >= m {
            return 1.0;
        }
        1.0 - (-(n * (n - 1.0)) / (2.0 * m)).exp()
    }

    pub fn code_space_stats(&self, used_codes: u64) -> CodeSpaceStats {
        let max_codes = self.max_codes();
        CodeSpaceStats {
            max_codes,
            used_codes,
            remaining_codes: (max_codes - used_codes as f64).max(0.0),
            utilization_percentage: used_codes as f64 / max_codes * 100.0,
            collision_probability: self.estimate_collision_probability(used_codes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CHARSET;

    fn generator(charset: &str, length: usize) -> CodeGenerator {
        CodeGenerator::new(&CodeConfig {
            charset: charset.to_string(),
            length,
        })
    }

    fn default_generator() -> CodeGenerator {
        generator(DEFAULT_CHARSET, 5)
    }

    #[test]
    fn test_generate_one_is_valid() {
        let gen = default_generator();
        for _ in 0..100 {
            let code = gen.generate_one();
            assert!(gen.is_valid_code(&code), "invalid code: {}", code);
        }
    }

    #[test]
    fn test_generate_many_unique_and_valid() {
        let gen = default_generator();
        let codes = gen.generate_many(1000, &HashSet::new());

        assert_eq!(codes.len(), 1000);
        let unique: HashSet<&String> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
        assert!(codes.iter().all(|c| gen.is_valid_code(c)));
    }

    #[test]
    fn test_generate_many_respects_exclusion() {
        // Space of 4 codes; exclude 2, ask for 4 -> at most 2 come back.
        let gen = generator("ab", 2);
        let exclude: HashSet<String> = ["aa".to_string(), "ab".to_string()].into();

        let codes = gen.generate_many(4, &exclude);

        assert!(codes.len() <= 2);
        assert!(codes.iter().all(|c| !exclude.contains(c)));
    }

    #[test]
    fn test_generate_many_partial_on_exhausted_space() {
        // 2^3 = 8 possible codes, request far more.
        let gen = generator("ab", 3);
        let codes = gen.generate_many(100, &HashSet::new());

        assert!(codes.len() <= 8);
        let unique: HashSet<&String> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[tokio::test]
    async fn test_generate_batch_unique_across_chunks() {
        let gen = default_generator();
        let mut progress_calls = 0;

        let codes = gen
            .generate_batch(250, &HashSet::new(), 100, |p| {
                progress_calls += 1;
                assert_eq!(p.total_chunks, 3);
                assert!(p.percentage <= 100.0);
            })
            .await;

        assert_eq!(codes.len(), 250);
        assert_eq!(progress_calls, 3);
        let unique: HashSet<&String> = codes.iter().collect();
        assert_eq!(unique.len(), 250);
    }

    #[tokio::test]
    async fn test_generate_batch_honors_exclusion() {
        let gen = default_generator();
        let exclude: HashSet<String> = gen.generate_many(50, &HashSet::new()).into_iter().collect();

        let codes = gen.generate_batch(100, &exclude, 30, |_| {}).await;

        assert!(codes.iter().all(|c| !exclude.contains(c)));
    }

    #[test]
    fn test_is_valid_code() {
        let gen = generator("abc", 3);

        assert!(gen.is_valid_code("abc"));
        assert!(gen.is_valid_code("ccc"));
        assert!(!gen.is_valid_code("ab"));
        assert!(!gen.is_valid_code("abcd"));
        assert!(!gen.is_valid_code("abd"));
        assert!(!gen.is_valid_code(""));
    }

    #[test]
    fn test_collision_probability_monotonic() {
        let gen = generator("abcdefghijklmnopqrstuvwxyz", 3);
        let mut last = 0.0;
        for n in [0u64, 1, 10, 100, 1_000, 10_000, 17_576, 20_000] {
            let p = gen.estimate_collision_probability(n);
            assert!(p >= last, "probability decreased at n={}", n);
            assert!((0.0..=1.0).contains(&p));
            last = p;
        }
    }

    #[test]
    fn test_collision_probability_saturates() {
        let gen = generator("ab", 3);
        assert_eq!(gen.estimate_collision_probability(8), 1.0);
        assert_eq!(gen.estimate_collision_probability(1_000), 1.0);
    }

    #[test]
    fn test_code_space_stats_scenario() {
        // Lowercase-only, length 3: 26^3 = 17,576 codes. 100 used codes is
        // roughly 0.57% utilization.
        let gen = generator("abcdefghijklmnopqrstuvwxyz", 3);
        let stats = gen.code_space_stats(100);

        assert_eq!(stats.max_codes, 17_576.0);
        assert_eq!(stats.used_codes, 100);
        assert_eq!(stats.remaining_codes, 17_476.0);
        assert!((stats.utilization_percentage - 0.569).abs() < 0.01);
    }
}
