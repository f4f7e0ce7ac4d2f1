//! Fixed-point temperature type and the small numeric primitives shared by
//! every control loop: an exponentially-weighted moving average, a rolling
//! linear derivative, and a threshold integral with jacket clamping.
//!
//! Every operator here is total: no panics, no unsigned wraparound. Inputs
//! that would otherwise panic (division by a zero time constant, a time
//! constant window of zero ticks) are defined to saturate instead.

use hc_error::{Error, Result};

/// Internal temperature unit: centi-degrees above absolute zero (so that
/// the all-zero value is never a physically valid temperature and can
/// double as the "unset" marker).
pub const CENTI_PER_DEGREE: i32 = 100;

/// 0 degrees Celsius in centi-Kelvin (273.15 K).
pub const ZERO_CELSIUS_CENTIKELVIN: i32 = 27315;

/// Sentinel raw value meaning "sensor short-circuited".
const RAW_SHORT: i32 = i32::MIN;
/// Sentinel raw value meaning "sensor disconnected".
const RAW_DISCON: i32 = i32::MAX;

/// Hardware-reasonable bounds: -50°C..200°C covers every sensor location
/// this plant model reads from (outdoor, boiler body, tank, circuit water).
const RAW_MIN_VALID: i32 = ZERO_CELSIUS_CENTIKELVIN - 50 * CENTI_PER_DEGREE;
const RAW_MAX_VALID: i32 = ZERO_CELSIUS_CENTIKELVIN + 200 * CENTI_PER_DEGREE;

/// A temperature in the plant's internal fixed-point unit.
///
/// `Temp(0)` is the "unset" marker: it is never a valid reading since it
/// would correspond to absolute zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Temp(i32);

impl Temp {
    pub const UNSET: Temp = Temp(0);
    pub const SHORT: Temp = Temp(RAW_SHORT);
    pub const DISCONNECTED: Temp = Temp(RAW_DISCON);

    pub const fn from_raw(raw: i32) -> Self {
        Temp(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub fn is_set(self) -> bool {
        self.0 != 0
    }
}

/// A Kelvin delta in the same fixed-point resolution as [`Temp`], but
/// without the absolute-zero offset (so it can be negative).
pub type DeltaK = i32;

pub fn celsius_to_temp(c: f64) -> Temp {
    Temp(((c * CENTI_PER_DEGREE as f64).round() as i32).saturating_add(ZERO_CELSIUS_CENTIKELVIN))
}

pub fn temp_to_celsius(t: Temp) -> f64 {
    (t.0 - ZERO_CELSIUS_CENTIKELVIN) as f64 / CENTI_PER_DEGREE as f64
}

pub fn deltak_to_temp(dk: f64) -> DeltaK {
    (dk * CENTI_PER_DEGREE as f64).round() as i32
}

pub fn temp_to_deltak(d: DeltaK) -> f64 {
    d as f64 / CENTI_PER_DEGREE as f64
}

/// Integer Kelvin·duration: `delta` (centi-Kelvin) accumulated over
/// `dt_s` seconds, in centi-Kelvin-seconds. Used by [`ThrsIntg`].
pub fn ikelvind(delta: DeltaK, dt_s: i64) -> i64 {
    delta as i64 * dt_s
}

pub fn ks_to_centiks(kelvin_seconds: f64) -> i64 {
    (kelvin_seconds * CENTI_PER_DEGREE as f64).round() as i64
}

pub fn centiks_to_ks(centi_kelvin_seconds: i64) -> f64 {
    centi_kelvin_seconds as f64 / CENTI_PER_DEGREE as f64
}

/// Validates a raw sensor reading: rejects the unset/short/disconnected
/// markers and anything outside the hardware-reasonable range, returning
/// a precise error kind for each.
pub fn validate_temp(t: Temp) -> Result<()> {
    if t == Temp::UNSET {
        return Err(Error::SensorDiscon("reading unset".into()));
    }
    if t == Temp::SHORT {
        return Err(Error::SensorShort("sensor short-circuited".into()));
    }
    if t == Temp::DISCONNECTED {
        return Err(Error::SensorDiscon("sensor disconnected".into()));
    }
    if t.0 < RAW_MIN_VALID || t.0 > RAW_MAX_VALID {
        return Err(Error::SensorInvalid(format!(
            "{:.2}C outside hardware-reasonable range",
            temp_to_celsius(t)
        )));
    }
    Ok(())
}

/// Exponentially-weighted moving average with time constant `tau_s` and
/// elapsed `dt_s`. `dt_s == 0` returns `prev` exactly (otherwise a
/// zero-elapsed-time call would slowly drift the average away from the
/// true previous value through repeated rounding).
pub fn expw_mavg(prev: f64, sample: f64, tau_s: f64, dt_s: f64) -> f64 {
    if dt_s <= 0.0 {
        return prev;
    }
    if tau_s <= 0.0 {
        return sample;
    }
    let alpha = (dt_s / tau_s).min(1.0);
    prev + alpha * (sample - prev)
}

/// [`expw_mavg`] specialized to [`Temp`] values.
pub fn expw_mavg_temp(prev: Temp, sample: Temp, tau_s: f64, dt_s: f64) -> Temp {
    if dt_s <= 0.0 {
        return prev;
    }
    let result = expw_mavg(prev.0 as f64, sample.0 as f64, tau_s, dt_s);
    Temp(result.round() as i32)
}

/// Fixed-point denominator (as a power of two shift) for [`LinDeriv`]'s
/// output, kept compile-time constant so that a Kelvin/tick figure can be
/// recovered with a plain shift rather than a runtime division.
pub const DERIV_SHIFT: u32 = 16;

/// Rolling linear derivative of a temperature series, smoothed over a time
/// constant `tau_s`. The result is signed Kelvin-per-second, scaled by
/// `2^DERIV_SHIFT`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinDeriv {
    last_time_s: i64,
    last_sample: i32,
    deriv_q: i64,
    initialized: bool,
}

impl LinDeriv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Value of the smoothed derivative, in centi-Kelvin per second scaled
    /// by `2^DERIV_SHIFT`.
    pub fn value_q(&self) -> i64 {
        self.deriv_q
    }

    /// Value of the smoothed derivative, in Kelvin per second.
    pub fn value_k_per_s(&self) -> f64 {
        (self.deriv_q as f64 / (1i64 << DERIV_SHIFT) as f64) / CENTI_PER_DEGREE as f64
    }

    pub fn update(&mut self, sample: Temp, time_s: i64, tau_s: f64) -> i64 {
        if !self.initialized {
            self.initialized = true;
            self.last_time_s = time_s;
            self.last_sample = sample.raw();
            self.deriv_q = 0;
            return self.deriv_q;
        }
        let dt = (time_s - self.last_time_s).max(1) as f64;
        let inst_rate_q =
            ((sample.raw() - self.last_sample) as f64 / dt) * (1i64 << DERIV_SHIFT) as f64;
        let alpha = (dt / tau_s.max(1.0)).min(1.0);
        self.deriv_q = (self.deriv_q as f64 + alpha * (inst_rate_q - self.deriv_q as f64)) as i64;
        self.last_time_s = time_s;
        self.last_sample = sample.raw();
        self.deriv_q
    }
}

/// Integral of `(sample - threshold)` over time, clamped to
/// `[jacket_lo, jacket_hi]` (both in centi-Kelvin-seconds, see
/// [`ks_to_centiks`]). Used for the boiler's cold-start and
/// return-temperature protection integrators.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThrsIntg {
    last_time_s: i64,
    value: i64,
    initialized: bool,
}

impl ThrsIntg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn update(
        &mut self,
        threshold: Temp,
        sample: Temp,
        time_s: i64,
        jacket_lo: i64,
        jacket_hi: i64,
    ) -> i64 {
        if self.initialized {
            let dt = (time_s - self.last_time_s).max(0);
            let delta = sample.raw() - threshold.raw();
            self.value += ikelvind(delta, dt);
            self.value = self.value.clamp(jacket_lo, jacket_hi);
        } else {
            self.initialized = true;
        }
        self.last_time_s = time_s;
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expw_mavg_zero_dt_is_exact() {
        assert_eq!(expw_mavg(12.34, 99.0, 60.0, 0.0), 12.34);
    }

    #[test]
    fn expw_mavg_saturates_for_large_dt() {
        let r = expw_mavg(10.0, 20.0, 60.0, 10_000.0);
        assert!((r - 20.0).abs() < 1e-9);
    }

    #[test]
    fn validate_temp_rejects_the_three_markers() {
        assert!(validate_temp(Temp::UNSET).is_err());
        assert!(validate_temp(Temp::SHORT).is_err());
        assert!(validate_temp(Temp::DISCONNECTED).is_err());
        assert!(validate_temp(celsius_to_temp(20.0)).is_ok());
    }

    #[test]
    fn validate_temp_rejects_out_of_hardware_range() {
        assert!(validate_temp(celsius_to_temp(500.0)).is_err());
        assert!(validate_temp(celsius_to_temp(-80.0)).is_err());
    }

    #[test]
    fn celsius_roundtrip() {
        let t = celsius_to_temp(45.5);
        assert!((temp_to_celsius(t) - 45.5).abs() < 0.01);
    }

    #[test]
    fn thrs_intg_accumulates_and_clamps() {
        let mut s = ThrsIntg::new();
        let threshold = celsius_to_temp(40.0);
        let sample = celsius_to_temp(30.0);
        s.update(threshold, sample, 0, ks_to_centiks(-100.0), 0);
        let v = s.update(threshold, sample, 30, ks_to_centiks(-100.0), 0);
        // (30 - 40) * 30s = -300 K*s -> clamped to -100 K*s jacket
        assert_eq!(v, ks_to_centiks(-100.0));
    }
}
