//! Random lengths and task ids.
//!
//! Normal samples come from a Box-Muller transform over a seeded `StdRng`,
//! so the same seed and count always give the same lengths.

use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;

use crate::error::{PrepError, Result};

/// Mean and standard deviation of a length distribution, in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LenDist {
    pub mean: u64,
    pub stdev: u64,
}

static LEN_DIST_RE: OnceLock<Regex> = OnceLock::new();

/// Parse `--output-len-dist` (`"<mean>,<stdev>"`).
pub fn parse_output_len_dist(value: &str) -> Result<LenDist> {
    let re = LEN_DIST_RE.get_or_init(|| Regex::new(r"^(\d+),(\d+)").expect("static regex"));
    let usage = || {
        PrepError::Usage(
            "Incorrect specification for --output-len-dist. Correct format: \
             --output-len-dist <output_len_mean>,<output_len_stdev>"
                .into(),
        )
    };
    let caps = re.captures(value).ok_or_else(usage)?;
    let mean = caps[1].parse().map_err(|_| usage())?;
    let stdev = caps[2].parse().map_err(|_| usage())?;
    Ok(LenDist { mean, stdev })
}

/// `count` lengths drawn from N(mean, stdev), rounded and clamped at zero.
pub fn norm_dist_lengths(mean: f64, stdev: f64, count: usize, seed: u64) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let x = mean + stdev * standard_normal(&mut rng);
            x.round().max(0.0) as u64
        })
        .collect()
}

fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    // u1 in (0, 1] keeps ln() finite
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Hands out the task id (LoRA adapter) of each accepted request.
pub enum TaskIds {
    Fixed(i64),
    Uniform { min: i64, max: i64, rng: StdRng },
}

impl TaskIds {
    /// `range` is inclusive on both ends; an inverted range is a usage error.
    pub fn new(task_id: i64, range: Option<(i64, i64)>, seed: u64) -> Result<Self> {
        match range {
            None => Ok(TaskIds::Fixed(task_id)),
            Some((min, max)) if min > max => Err(PrepError::Usage(format!(
                "Incorrect specification for --rand-task-id: min {min} is larger than max {max}"
            ))),
            Some((min, max)) => Ok(TaskIds::Uniform {
                min,
                max,
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    pub fn next_id(&mut self) -> i64 {
        match self {
            TaskIds::Fixed(id) => *id,
            TaskIds::Uniform { min, max, rng } => rng.gen_range(*min..=*max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mean_and_stdev() {
        assert_eq!(
            parse_output_len_dist("100,10").unwrap(),
            LenDist { mean: 100, stdev: 10 }
        );
        assert_eq!(
            parse_output_len_dist("0,0").unwrap(),
            LenDist { mean: 0, stdev: 0 }
        );
    }

    #[test]
    fn rejects_malformed_dist() {
        for bad in ["abc", "", "100", "100;10", "-5,2", ",10", " 100,10"] {
            let err = parse_output_len_dist(bad).unwrap_err();
            assert!(matches!(err, PrepError::Usage(_)), "{bad:?} should be a usage error");
        }
    }

    #[test]
    fn huge_numbers_are_usage_errors() {
        assert!(matches!(
            parse_output_len_dist("99999999999999999999999,1"),
            Err(PrepError::Usage(_))
        ));
    }

    #[test]
    fn lengths_are_reproducible() {
        let a = norm_dist_lengths(100.0, 10.0, 5, 420);
        let b = norm_dist_lengths(100.0, 10.0, 5, 420);
        assert_eq!(a.len(), 5);
        assert_eq!(a, b);

        let c = norm_dist_lengths(100.0, 10.0, 500, 1);
        let d = norm_dist_lengths(100.0, 10.0, 500, 2);
        assert_ne!(c, d);
    }

    #[test]
    fn lengths_clamp_at_zero() {
        let lens = norm_dist_lengths(0.0, 50.0, 1000, 7);
        assert_eq!(lens.len(), 1000);
        assert!(lens.iter().any(|&l| l == 0));
        assert!(lens.iter().any(|&l| l > 0));
    }

    #[test]
    fn zero_stdev_returns_mean() {
        assert!(norm_dist_lengths(128.0, 0.0, 10, 3).iter().all(|&l| l == 128));
    }

    #[test]
    fn sample_mean_is_close() {
        let lens = norm_dist_lengths(100.0, 10.0, 10_000, 420);
        let mean = lens.iter().sum::<u64>() as f64 / lens.len() as f64;
        assert!((mean - 100.0).abs() < 1.0, "mean {mean}");
    }

    #[test]
    fn task_ids_stay_in_range() {
        let mut ids = TaskIds::new(-1, Some((1, 3)), 420).unwrap();
        let drawn: Vec<i64> = (0..200).map(|_| ids.next_id()).collect();
        assert!(drawn.iter().all(|id| (1..=3).contains(id)));
        for want in 1..=3 {
            assert!(drawn.contains(&want));
        }
    }

    #[test]
    fn fixed_task_id() {
        let mut ids = TaskIds::new(-1, None, 0).unwrap();
        assert!((0..10).all(|_| ids.next_id() == -1));
    }

    #[test]
    fn inverted_task_range_rejected() {
        assert!(matches!(
            TaskIds::new(0, Some((5, 2)), 0),
            Err(PrepError::Usage(_))
        ));
    }
}
