//! Dot-product kernels with runtime SIMD dispatch.
//!
//! The scalar kernel is the reference: every accelerated back-end must match
//! it to within `1e-5` absolute for normalised inputs (all back-ends here
//! accumulate in `f64`, so they agree far more tightly than that). Kernel
//! selection happens once, at first use, and is cached behind a function
//! pointer; no per-call feature checks sit on the hot path.
//!
//! | Platform     | ISA       | Lanes per iteration |
//! |--------------|-----------|---------------------|
//! | x86_64+AVX2  | AVX2+FMA  | 8×f32 widened to 2×4×f64 |
//! | aarch64      | NEON      | 4×f32 widened to 2×2×f64 |
//! | other        | scalar    | 1 |

use std::sync::OnceLock;

use crate::DIM;

type DotFn = fn(&[f32], &[f32]) -> f64;

struct Kernel {
    name: &'static str,
    dot: DotFn,
}

static KERNEL: OnceLock<Kernel> = OnceLock::new();

fn kernel() -> &'static Kernel {
    KERNEL.get_or_init(|| {
        let k = select_kernel();
        tracing::debug!(kernel = k.name, "selected dot-product kernel");
        k
    })
}

fn select_kernel() -> Kernel {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return Kernel {
                name: "avx2+fma",
                dot: dot_avx2_entry,
            };
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        return Kernel {
            name: "neon",
            dot: dot_neon_entry,
        };
    }
    #[allow(unreachable_code)]
    Kernel {
        name: "scalar",
        dot: dot_scalar,
    }
}

/// Human-readable name of the active kernel, for startup logging.
#[must_use]
pub fn kernel_name() -> &'static str {
    kernel().name
}

/// Dot product of two [`DIM`]-long float32 slices, accumulated in `f64`.
///
/// For L2-normalised vectors this is the cosine similarity. Returns `0.0`
/// unless both inputs are exactly [`DIM`] long.
#[inline]
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != DIM || b.len() != DIM {
        return 0.0;
    }
    (kernel().dot)(a, b)
}

/// Reference scalar implementation of [`dot`]. Ground truth for the
/// accelerated back-ends; exposed for parity testing.
#[must_use]
pub fn dot_scalar(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum()
}

/// Dot products of `query` against the first `n` row-major vectors in
/// `data` (`data[i*DIM..(i+1)*DIM]` is row `i`).
///
/// Returns an empty vector when `query` is not [`DIM`]-long, `n` is zero,
/// or `data` holds fewer than `n` rows.
#[must_use]
pub fn dot_batch_flat(query: &[f32], data: &[f32], n: usize) -> Vec<f64> {
    let mut out = vec![0.0; n];
    if !dot_batch_into(query, data, n, &mut out) {
        return Vec::new();
    }
    out
}

/// Scratch-friendly variant of [`dot_batch_flat`]: writes scores into
/// `out[..n]` and returns whether the inputs were valid.
pub fn dot_batch_into(query: &[f32], data: &[f32], n: usize, out: &mut [f64]) -> bool {
    if query.len() != DIM || n == 0 || data.len() < n * DIM || out.len() < n {
        return false;
    }
    let dot = kernel().dot;
    for (score, row) in out.iter_mut().zip(data.chunks_exact(DIM)).take(n) {
        *score = dot(query, row);
    }
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Accelerated back-ends
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(target_arch = "x86_64")]
fn dot_avx2_entry(a: &[f32], b: &[f32]) -> f64 {
    // Feature presence was verified during kernel selection.
    unsafe { dot_avx2(a, b) }
}

/// AVX2+FMA dot product. Each 8-float chunk is widened to two 4×f64 lanes
/// so the accumulation matches the scalar kernel's precision.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn dot_avx2(a: &[f32], b: &[f32]) -> f64 {
    use std::arch::x86_64::*;

    let n = a.len();
    let chunks = n / 8;

    let mut acc_lo = _mm256_setzero_pd();
    let mut acc_hi = _mm256_setzero_pd();

    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks {
        let va = _mm256_loadu_ps(a_ptr.add(i * 8));
        let vb = _mm256_loadu_ps(b_ptr.add(i * 8));

        let a_lo = _mm256_cvtps_pd(_mm256_castps256_ps128(va));
        let a_hi = _mm256_cvtps_pd(_mm256_extractf128_ps(va, 1));
        let b_lo = _mm256_cvtps_pd(_mm256_castps256_ps128(vb));
        let b_hi = _mm256_cvtps_pd(_mm256_extractf128_ps(vb, 1));

        acc_lo = _mm256_fmadd_pd(a_lo, b_lo, acc_lo);
        acc_hi = _mm256_fmadd_pd(a_hi, b_hi, acc_hi);
    }

    // Horizontal sum of 4 doubles.
    let acc = _mm256_add_pd(acc_lo, acc_hi);
    let hi128 = _mm256_extractf128_pd(acc, 1);
    let lo128 = _mm256_castpd256_pd128(acc);
    let pair = _mm_add_pd(lo128, hi128);
    let swapped = _mm_unpackhi_pd(pair, pair);
    let mut sum = _mm_cvtsd_f64(_mm_add_sd(pair, swapped));

    for i in (chunks * 8)..n {
        sum += f64::from(a[i]) * f64::from(b[i]);
    }
    sum
}

#[cfg(target_arch = "aarch64")]
fn dot_neon_entry(a: &[f32], b: &[f32]) -> f64 {
    // NEON is baseline on aarch64.
    unsafe { dot_neon(a, b) }
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn dot_neon(a: &[f32], b: &[f32]) -> f64 {
    use std::arch::aarch64::*;

    let n = a.len();
    let chunks = n / 4;

    let mut acc_lo = vdupq_n_f64(0.0);
    let mut acc_hi = vdupq_n_f64(0.0);

    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks {
        let va = vld1q_f32(a_ptr.add(i * 4));
        let vb = vld1q_f32(b_ptr.add(i * 4));

        let a_lo = vcvt_f64_f32(vget_low_f32(va));
        let a_hi = vcvt_high_f64_f32(va);
        let b_lo = vcvt_f64_f32(vget_low_f32(vb));
        let b_hi = vcvt_high_f64_f32(vb);

        acc_lo = vfmaq_f64(acc_lo, a_lo, b_lo);
        acc_hi = vfmaq_f64(acc_hi, a_hi, b_hi);
    }

    let mut sum = vaddvq_f64(acc_lo) + vaddvq_f64(acc_hi);

    for i in (chunks * 4)..n {
        sum += f64::from(a[i]) * f64::from(b[i]);
    }
    sum
}
