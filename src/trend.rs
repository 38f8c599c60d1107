// 📈 Trend Estimator - is the government-wide reappointment share rising or falling?
//
// Ordinary least squares of proportion on year, fitted on x = year - first_year.
// The reported slope is per calendar year; the intercept is the fitted value at
// `year_origin` (the first year in the series).
//
// Diagnostics over residuals ordered by year:
// - Durbin-Watson (autocorrelation)
// - Shapiro-Wilk (normality)
// - Breusch-Pagan, studentized LM = n * R² of e² on year (heteroscedasticity)
// - standardized residuals (outliers) and leverage / Cook's distance (influence)

use crate::annual::AnnualProportion;
use crate::config::{StrengthThresholds, TrendConfig};
use crate::error::AnalysisError;
use crate::stats;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Regression parameters (slope + intercept), for Cook's distance
const PARAMETERS: f64 = 2.0;

// ============================================================================
// INPUT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub year: i32,
    pub proportion: f64,
}

impl TrendPoint {
    pub fn new(year: i32, proportion: f64) -> Self {
        TrendPoint { year, proportion }
    }
}

/// One point per annual row, proportion in percent
pub fn points_from_annual(annual: &[AnnualProportion]) -> Vec<TrendPoint> {
    annual
        .iter()
        .map(|a| TrendPoint::new(a.year, a.proportion))
        .collect()
}

// ============================================================================
// INTERPRETATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    NoSignificantTrend,
}

impl TrendDirection {
    pub fn label(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::NoSignificantTrend => "no significant trend",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendStrength {
    Negligible,
    Weak,
    Moderate,
    Strong,
}

impl TrendStrength {
    pub fn from_slope(slope: f64, thresholds: &StrengthThresholds) -> Self {
        let magnitude = slope.abs();
        if magnitude < thresholds.negligible_below {
            TrendStrength::Negligible
        } else if magnitude < thresholds.weak_below {
            TrendStrength::Weak
        } else if magnitude < thresholds.moderate_below {
            TrendStrength::Moderate
        } else {
            TrendStrength::Strong
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrendStrength::Negligible => "negligible",
            TrendStrength::Weak => "weak",
            TrendStrength::Moderate => "moderate",
            TrendStrength::Strong => "strong",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Autocorrelation {
    /// Durbin-Watson below 1.5
    Positive,
    None,
    /// Durbin-Watson above 2.5
    Negative,
}

impl Autocorrelation {
    pub fn from_durbin_watson(dw: f64) -> Self {
        if dw < 1.5 {
            Autocorrelation::Positive
        } else if dw > 2.5 {
            Autocorrelation::Negative
        } else {
            Autocorrelation::None
        }
    }
}

// ============================================================================
// MODEL
// ============================================================================

/// Per-year fit details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointDiagnostics {
    pub year: i32,
    pub observed: f64,
    pub fitted: f64,
    pub residual: f64,

    /// residual / population std-dev of residuals (0 on a perfect fit)
    pub standardized_residual: f64,

    /// Hat-matrix diagonal
    pub leverage: f64,

    /// None when leverage is 1 (the point alone determines its fit)
    pub cooks_distance: Option<f64>,

    pub is_outlier: bool,
    pub is_high_leverage: bool,
    pub is_influential: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// None on a perfect fit (no residual variance)
    pub durbin_watson: Option<f64>,
    pub autocorrelation: Option<Autocorrelation>,

    pub shapiro_wilk_w: Option<f64>,
    pub shapiro_wilk_p: Option<f64>,
    pub residuals_normal: Option<bool>,

    pub breusch_pagan_lm: Option<f64>,
    pub breusch_pagan_p: Option<f64>,
    pub heteroscedastic: Option<bool>,

    /// 4 / n, applied to both leverage and Cook's distance
    pub influence_threshold: f64,

    pub outlier_years: Vec<i32>,
    pub influential_years: Vec<i32>,
    pub points: Vec<PointDiagnostics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendModel {
    pub n: usize,
    pub year_origin: i32,
    pub first_year: i32,
    pub last_year: i32,

    /// Change in proportion per year
    pub slope: f64,

    /// Fitted proportion at `year_origin`
    pub intercept: f64,

    pub r: f64,
    pub r_squared: f64,

    /// Standard error of the slope
    pub standard_error: f64,

    /// None when the standard error is 0
    pub t_statistic: Option<f64>,
    pub degrees_of_freedom: usize,

    /// Two-sided, H0: slope = 0
    pub p_value: f64,

    pub confidence_level: f64,
    pub confidence_interval: (f64, f64),

    pub significance_level: f64,
    pub is_significant: bool,
    pub direction: TrendDirection,
    pub strength: TrendStrength,

    /// slope * (last_year - first_year)
    pub total_change: f64,

    pub diagnostics: Diagnostics,
}

impl TrendModel {
    /// Fitted proportion for any calendar year
    pub fn predict(&self, year: i32) -> f64 {
        self.intercept + self.slope * (year - self.year_origin) as f64
    }

    pub fn summary(&self) -> String {
        format!(
            "{} ({}) trend {}-{}: slope {:+.4}/yr, {:.0}% CI [{:.4}, {:.4}], R² = {:.3}, p = {:.4}",
            self.direction.label(),
            self.strength.label(),
            self.first_year,
            self.last_year,
            self.slope,
            self.confidence_level * 100.0,
            self.confidence_interval.0,
            self.confidence_interval.1,
            self.r_squared,
            self.p_value
        )
    }
}

// ============================================================================
// TREND ESTIMATOR
// ============================================================================

pub struct TrendEstimator {
    config: TrendConfig,
}

impl TrendEstimator {
    pub fn new(config: &TrendConfig) -> Self {
        TrendEstimator {
            config: config.clone(),
        }
    }

    pub fn fit(&self, points: &[TrendPoint]) -> Result<TrendModel, AnalysisError> {
        let required = self.config.min_points.max(3);

        // Validate everything before computing anything
        let mut valid: Vec<TrendPoint> = points
            .iter()
            .copied()
            .filter(|p| p.proportion.is_finite())
            .collect();

        if valid.len() < required {
            return Err(AnalysisError::InsufficientData {
                valid: valid.len(),
                required,
            });
        }

        valid.sort_by_key(|p| p.year);

        let n = valid.len();
        let nf = n as f64;
        let year_origin = valid[0].year;
        let last_year = valid[n - 1].year;

        let x: Vec<f64> = valid.iter().map(|p| (p.year - year_origin) as f64).collect();
        let y: Vec<f64> = valid.iter().map(|p| p.proportion).collect();

        let x_mean = x.iter().sum::<f64>() / nf;
        let y_mean = y.iter().sum::<f64>() / nf;

        let sxx: f64 = x.iter().map(|xi| (xi - x_mean).powi(2)).sum();
        let syy: f64 = y.iter().map(|yi| (yi - y_mean).powi(2)).sum();
        let sxy: f64 = x.iter().zip(&y).map(|(xi, yi)| (xi - x_mean) * (yi - y_mean)).sum();

        if sxx <= 0.0 {
            return Err(AnalysisError::NoYearSpread {
                points: n,
                year: year_origin,
            });
        }

        // ====================================================================
        // FIT
        // ====================================================================
        let slope = sxy / sxx;
        let intercept = y_mean - slope * x_mean;

        let fitted: Vec<f64> = x.iter().map(|xi| intercept + slope * xi).collect();
        let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(yi, fi)| yi - fi).collect();
        let sse: f64 = residuals.iter().map(|e| e * e).sum();

        let perfect_fit = sse <= 1e-20 * (1.0 + syy);

        let (r, r_squared) = if syy > 0.0 {
            let r = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);
            (r, (1.0 - sse / syy).clamp(0.0, 1.0))
        } else {
            (0.0, 0.0)
        };

        // ====================================================================
        // INFERENCE
        // ====================================================================
        let df = n - 2;
        let dff = df as f64;
        let residual_variance = if perfect_fit { 0.0 } else { sse / dff };
        let standard_error = (residual_variance / sxx).sqrt();

        let (t_statistic, p_value) = if standard_error > 0.0 {
            let t = slope / standard_error;
            (Some(t), stats::student_t_two_sided_p(t, dff))
        } else if slope == 0.0 {
            (None, 1.0)
        } else {
            (None, 0.0)
        };

        let alpha = 1.0 - self.config.confidence_level;
        let t_critical = stats::student_t_quantile(1.0 - alpha / 2.0, dff);
        let margin = t_critical * standard_error;
        let confidence_interval = (slope - margin, slope + margin);

        let is_significant = p_value < self.config.significance_level;
        let direction = match (is_significant, slope) {
            (true, s) if s > 0.0 => TrendDirection::Increasing,
            (true, s) if s < 0.0 => TrendDirection::Decreasing,
            _ => TrendDirection::NoSignificantTrend,
        };
        let strength = TrendStrength::from_slope(slope, &self.config.strength);

        let diagnostics = self.diagnose(
            &valid,
            &x,
            x_mean,
            sxx,
            &fitted,
            &residuals,
            sse,
            residual_variance,
            perfect_fit,
        );

        let model = TrendModel {
            n,
            year_origin,
            first_year: year_origin,
            last_year,
            slope,
            intercept,
            r,
            r_squared,
            standard_error,
            t_statistic,
            degrees_of_freedom: df,
            p_value,
            confidence_level: self.config.confidence_level,
            confidence_interval,
            significance_level: self.config.significance_level,
            is_significant,
            direction,
            strength,
            total_change: slope * (last_year - year_origin) as f64,
            diagnostics,
        };

        info!("Trend: {}", model.summary());
        Ok(model)
    }

    #[allow(clippy::too_many_arguments)]
    fn diagnose(
        &self,
        points: &[TrendPoint],
        x: &[f64],
        x_mean: f64,
        sxx: f64,
        fitted: &[f64],
        residuals: &[f64],
        sse: f64,
        residual_variance: f64,
        perfect_fit: bool,
    ) -> Diagnostics {
        let n = residuals.len();
        let nf = n as f64;
        let influence_threshold = 4.0 / nf;

        // Autocorrelation
        let durbin_watson = if perfect_fit {
            None
        } else {
            let num: f64 = residuals.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum();
            Some(num / sse)
        };

        // Normality
        let shapiro = if perfect_fit {
            None
        } else {
            stats::shapiro_wilk(residuals)
        };

        // Heteroscedasticity: auxiliary regression of e² on x
        let (breusch_pagan_lm, breusch_pagan_p) = if perfect_fit {
            (None, None)
        } else {
            let u: Vec<f64> = residuals.iter().map(|e| e * e).collect();
            let u_mean = u.iter().sum::<f64>() / nf;
            let suu: f64 = u.iter().map(|ui| (ui - u_mean).powi(2)).sum();
            let sxu: f64 = x.iter().zip(&u).map(|(xi, ui)| (xi - x_mean) * (ui - u_mean)).sum();

            if suu > 0.0 {
                let lm = nf * (sxu * sxu) / (sxx * suu);
                (Some(lm), Some(stats::chi_squared_sf(lm, 1.0)))
            } else {
                (None, None)
            }
        };

        // Outliers & influence
        let e_mean = residuals.iter().sum::<f64>() / nf;
        let e_std = (residuals.iter().map(|e| (e - e_mean).powi(2)).sum::<f64>() / nf).sqrt();

        let diagnostics: Vec<PointDiagnostics> = points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let residual = residuals[i];
                let standardized_residual = if perfect_fit || e_std == 0.0 {
                    0.0
                } else {
                    residual / e_std
                };
                let leverage = 1.0 / nf + (x[i] - x_mean).powi(2) / sxx;

                let cooks_distance = if perfect_fit {
                    Some(0.0)
                } else if 1.0 - leverage < 1e-12 {
                    None
                } else {
                    Some(
                        residual * residual / (PARAMETERS * residual_variance) * leverage
                            / (1.0 - leverage).powi(2),
                    )
                };

                PointDiagnostics {
                    year: p.year,
                    observed: p.proportion,
                    fitted: fitted[i],
                    residual,
                    standardized_residual,
                    leverage,
                    cooks_distance,
                    is_outlier: standardized_residual.abs() > self.config.outlier_threshold,
                    is_high_leverage: leverage > influence_threshold,
                    is_influential: cooks_distance.map_or(true, |d| d > influence_threshold),
                }
            })
            .collect();

        let outlier_years = diagnostics.iter().filter(|d| d.is_outlier).map(|d| d.year).collect();
        let influential_years = diagnostics
            .iter()
            .filter(|d| d.is_influential)
            .map(|d| d.year)
            .collect();

        let alpha = self.config.significance_level;
        let result = Diagnostics {
            durbin_watson,
            autocorrelation: durbin_watson.map(Autocorrelation::from_durbin_watson),
            shapiro_wilk_w: shapiro.map(|s| s.w),
            shapiro_wilk_p: shapiro.map(|s| s.p_value),
            residuals_normal: shapiro.map(|s| s.p_value > alpha),
            breusch_pagan_lm,
            breusch_pagan_p,
            heteroscedastic: breusch_pagan_p.map(|p| p < alpha),
            influence_threshold,
            outlier_years,
            influential_years,
            points: diagnostics,
        };

        debug!(
            "Diagnostics: DW = {:?}, SW p = {:?}, BP p = {:?}, outliers = {:?}",
            result.durbin_watson, result.shapiro_wilk_p, result.breusch_pagan_p, result.outlier_years
        );

        result
    }
}

impl Default for TrendEstimator {
    fn default() -> Self {
        Self::new(&TrendConfig::default())
    }
}

/// Fit a trend with the given configuration
pub fn fit_trend(points: &[TrendPoint], config: &TrendConfig) -> Result<TrendModel, AnalysisError> {
    TrendEstimator::new(config).fit(points)
}

// ============================================================================
// TESTS
// ============================================================================
