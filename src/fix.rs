//! Location fixes and the geodesic distance between them.
//!
//! Distances use the Vincenty inverse formula on the WGS84 ellipsoid, which
//! is accurate to well under a millimetre for the short hops a walking or
//! driving track produces. Nearly antipodal pairs, where the iteration does
//! not converge, fall back to a great-circle distance on the mean sphere
//! (within about 0.5% there).

/// WGS84 semi-major axis in meters.
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 semi-minor axis in meters.
const WGS84_B: f64 = 6_356_752.3142;
/// Iteration cap for the Vincenty lambda loop.
const MAX_ITERATIONS: usize = 20;
/// Relative lambda change at which the iteration is considered converged.
const CONVERGENCE: f64 = 1.0e-12;
/// IUGG mean Earth radius in meters.
const MEAN_RADIUS: f64 = 6_371_008.8;

/// A single reported position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    /// When this fix was recorded (epoch seconds).
    pub recorded_at: u64,
}

impl GeoFix {
    /// Build a fix stamped with the current wall-clock time.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            recorded_at: now_epoch_secs(),
        }
    }

    /// `true` when both coordinates are finite and inside the WGS84 ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        coordinates_in_range(self.latitude, self.longitude)
    }

    /// Ellipsoidal distance to `other` in meters.
    #[must_use]
    pub fn distance_to(&self, other: &GeoFix) -> f64 {
        vincenty_distance(
            self.latitude,
            self.longitude,
            other.latitude,
            other.longitude,
        )
    }
}

/// Range check shared by [`GeoFix::is_valid`] and the geocoders.
#[must_use]
pub fn coordinates_in_range(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

pub(crate) fn now_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Vincenty inverse solution. Inputs in decimal degrees, result in meters.
#[allow(
    clippy::many_single_char_names,
    clippy::similar_names,
    clippy::float_cmp
)]
fn vincenty_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let f = (WGS84_A - WGS84_B) / WGS84_A;
    let a_sq_minus_b_sq_over_b_sq =
        (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_B * WGS84_B);

    let l = (lon2 - lon1).to_radians();
    let u1 = ((1.0 - f) * lat1.to_radians().tan()).atan();
    let u2 = ((1.0 - f) * lat2.to_radians().tan()).atan();

    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();
    let cos_u1_cos_u2 = cos_u1 * cos_u2;
    let sin_u1_sin_u2 = sin_u1 * sin_u2;

    let mut big_a = 0.0;
    let mut sigma = 0.0;
    let mut delta_sigma = 0.0;
    let mut lambda = l;
    let mut converged = false;

    for _ in 0..MAX_ITERATIONS {
        let lambda_prev = lambda;
        let (sin_lambda, cos_lambda) = lambda.sin_cos();

        let t1 = cos_u2 * sin_lambda;
        let t2 = cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda;
        let sin_sigma = (t1 * t1 + t2 * t2).sqrt();
        let cos_sigma = sin_u1_sin_u2 + cos_u1_cos_u2 * cos_lambda;
        sigma = sin_sigma.atan2(cos_sigma);

        let sin_alpha = if sin_sigma == 0.0 {
            0.0
        } else {
            cos_u1_cos_u2 * sin_lambda / sin_sigma
        };
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        let cos_2sm = if cos_sq_alpha == 0.0 {
            0.0
        } else {
            cos_sigma - 2.0 * sin_u1_sin_u2 / cos_sq_alpha
        };

        let u_sq = cos_sq_alpha * a_sq_minus_b_sq_over_b_sq;
        big_a = 1.0 + (u_sq / 16384.0) * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
        let big_b = (u_sq / 1024.0) * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
        let c = (f / 16.0) * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
        let cos_2sm_sq = cos_2sm * cos_2sm;

        delta_sigma = big_b
            * sin_sigma
            * (cos_2sm
                + (big_b / 4.0)
                    * (cos_sigma * (-1.0 + 2.0 * cos_2sm_sq)
                        - (big_b / 6.0)
                            * cos_2sm
                            * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                            * (-3.0 + 4.0 * cos_2sm_sq)));

        lambda = l
            + (1.0 - c)
                * f
                * sin_alpha
                * (sigma + c * sin_sigma * (cos_2sm + c * cos_sigma * (-1.0 + 2.0 * cos_2sm_sq)));

        if (lambda - lambda_prev).abs() <= CONVERGENCE * lambda.abs() {
            converged = true;
            break;
        }
    }

    if !converged {
        return haversine_distance(lat1, lon1, lat2, lon2);
    }
    WGS84_B * big_a * (sigma - delta_sigma)
}

/// Great-circle distance on a sphere of [`MEAN_RADIUS`].
fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let half_dphi = (phi2 - phi1) / 2.0;
    let half_dlambda = (lon2 - lon1).to_radians() / 2.0;
    let h = half_dphi.sin().powi(2) + phi1.cos() * phi2.cos() * half_dlambda.sin().powi(2);
    2.0 * MEAN_RADIUS * h.sqrt().min(1.0).asin()
}
