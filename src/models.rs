//! A ready-made registry for fitting engine fuel maps.
//!
//! Measured engine data comes in under `/data` using one quantity of each of
//! three kinds:
//!
//! | kind              | paths                                                |
//! |-------------------|------------------------------------------------------|
//! | engine speed      | `rpm`, `rpm_norm`, `omega` (rad/s), `cm` (m/s)       |
//! | work capability   | `p` (kW), `p_norm`, `t` (Nm), `pme` (bar)            |
//! | fuel consumption  | `fc` (g/h), `fc_norm`, `pmf` (bar)                   |
//!
//! Engine parameters live under `/engine`: `capacity` (cm³), `stroke` (mm),
//! `p_max` (kW), `rpm_idle`, `rpm_rated` and `fuel`. The conversions between
//! the quantities of a kind are registered in both directions, leaving it to
//! the resolver to find the route from whatever was measured to the mean
//! effective pressures the fit needs.
//!
//! The fit produces the [Willans line] `pme = a * pmf - b` of the engine under
//! [`ENGINE_MAP`]. It comes in two variants sharing the same outputs: ordinary
//! least squares ([`Mode::Fast`], preferred by default) and the Theil-Sen
//! estimator ([`Mode::Robust`]), which tolerates outliers in the measurements.
//!
//! [Willans line]: https://en.wikipedia.org/wiki/Willans_line

use std::f64::consts::TAU;

use anyhow::{bail, ensure};

use crate::error::{GraphBuildError, ModelError, ValueError};
use crate::function::Inputs;
use crate::{Graph, GraphBuilder, Mode, Path, Value, ValueStore};

/// Outputs of the fitted engine map.
pub const ENGINE_MAP: [&str; 2] = ["/engine_map/a", "/engine_map/b"];

/// Lower heating values of the supported fuels, in MJ/kg.
const FUELS: [(&str, f64); 2] = [("diesel", 42.7), ("petrol", 43.2)];

type Output = anyhow::Result<Vec<Value>>;

/// The defaults every engine model starts from.
pub fn base_model() -> ValueStore {
    [("/engine/fuel", Value::from("diesel"))].into_iter().collect()
}

/// Engine parameters which, when given, must be positive scalars.
const ENGINE_SCALARS: [&str; 5] = [
    "/engine/capacity",
    "/engine/stroke",
    "/engine/p_max",
    "/engine/rpm_idle",
    "/engine/rpm_rated",
];

/// Checks a merged model before it is calculated on: the kinds of the engine
/// parameters and measurements, the fuel, and the speed range.
pub fn validate(model: &ValueStore) -> Result<(), ModelError> {
    let scalar = |key: &str| -> Result<Option<f64>, ModelError> {
        let path = Path::new(key);
        let Some(value) = model.get(&path) else {
            return Ok(None);
        };
        let value = value
            .as_scalar()
            .map_err(|source| ModelError::Kind { path: path.clone(), source })?;
        if !(value.is_finite() && value > 0.0) {
            return Err(ModelError::NotPositive { path, value });
        }
        Ok(Some(value))
    };

    for key in ENGINE_SCALARS {
        scalar(key)?;
    }

    if let (Some(idle), Some(rated)) = (scalar("/engine/rpm_idle")?, scalar("/engine/rpm_rated")?)
        && idle >= rated
    {
        return Err(ModelError::SpeedRange { idle, rated });
    }

    let fuel = Path::new("/engine/fuel");
    if let Some(value) = model.get(&fuel) {
        let name = value
            .as_text()
            .map_err(|source| ModelError::Kind { path: fuel.clone(), source })?;
        if !FUELS.iter().any(|(known, _)| known.eq_ignore_ascii_case(name)) {
            return Err(ModelError::UnknownFuel {
                fuel: name.to_owned(),
                expected: FUELS.map(|(known, _)| known).join(", "),
            });
        }
    }

    let data = Path::new("/data");
    for (path, value) in model.iter().filter(|(path, _)| path.starts_with(&data)) {
        value.as_vector().map_err(|source| ModelError::Kind {
            path: path.clone(),
            source,
        })?;
    }

    Ok(())
}

/// Builds the graph with every conversion and both fits.
pub fn standard_registry() -> Result<Graph, GraphBuildError> {
    let mut b = GraphBuilder::new();
    b.primary_input("/engine").primary_input("/data");

    // engine speed
    b.function("rpm_from_omega")
        .inputs(["/data/omega"])
        .outputs(["/data/rpm"])
        .register(|i: &Inputs| -> Output { Ok(vec![i[0].map(|w| w * 60.0 / TAU)?]) })?;
    b.function("omega_from_rpm")
        .inputs(["/data/rpm"])
        .outputs(["/data/omega"])
        .register(|i: &Inputs| -> Output { Ok(vec![i[0].map(|n| n * TAU / 60.0)?]) })?;
    b.function("rpm_from_norm")
        .inputs(["/data/rpm_norm", "/engine/rpm_idle", "/engine/rpm_rated"])
        .outputs(["/data/rpm"])
        .register(rpm_from_norm)?;
    b.function("rpm_from_cm")
        .inputs(["/data/cm", "/engine/stroke"])
        .outputs(["/data/rpm"])
        .register(|i: &Inputs| -> Output { Ok(vec![i[0].zip_with(&i[1], |cm, s| cm * 30_000.0 / s)?]) })?;
    b.function("cm_from_rpm")
        .inputs(["/data/rpm", "/engine/stroke"])
        .outputs(["/data/cm"])
        .register(|i: &Inputs| -> Output { Ok(vec![i[0].zip_with(&i[1], |n, s| n * s / 30_000.0)?]) })?;

    // work capability
    b.function("p_from_norm")
        .inputs(["/data/p_norm", "/engine/p_max"])
        .outputs(["/data/p"])
        .register(|i: &Inputs| -> Output { Ok(vec![i[0].zip_with(&i[1], |p, max| p * max)?]) })?;
    b.function("p_from_torque")
        .inputs(["/data/t", "/data/omega"])
        .outputs(["/data/p"])
        .register(|i: &Inputs| -> Output { Ok(vec![i[0].zip_with(&i[1], |t, w| t * w / 1000.0)?]) })?;
    b.function("torque_from_p")
        .inputs(["/data/p", "/data/omega"])
        .outputs(["/data/t"])
        .register(|i: &Inputs| -> Output { Ok(vec![i[0].zip_with(&i[1], |p, w| p * 1000.0 / w)?]) })?;
    b.function("pme_from_p")
        .inputs(["/data/p", "/data/rpm", "/engine/capacity"])
        .outputs(["/data/pme"])
        .register(|i: &Inputs| -> Output { Ok(vec![to_mean_pressure(&i[0], &i[1], &i[2])?]) })?;
    b.function("p_from_pme")
        .inputs(["/data/pme", "/data/rpm", "/engine/capacity"])
        .outputs(["/data/p"])
        .register(|i: &Inputs| -> Output { Ok(vec![from_mean_pressure(&i[0], &i[1], &i[2])?]) })?;

    // fuel consumption
    b.function("fuel_lhv")
        .inputs(["/engine/fuel"])
        .outputs(["/engine/fuel_lhv"])
        .register(fuel_lhv)?;
    b.function("fc_from_norm")
        .inputs(["/data/fc_norm", "/engine/p_max"])
        .outputs(["/data/fc"])
        .register(|i: &Inputs| -> Output { Ok(vec![i[0].zip_with(&i[1], |fc, max| fc * max)?]) })?;
    b.function("pmf_from_fc")
        .inputs(["/data/fc", "/data/rpm", "/engine/capacity", "/engine/fuel_lhv"])
        .outputs(["/data/pmf"])
        .register(|i: &Inputs| -> Output {
            // g/h * kJ/g -> kW of fuel power
            let fuel_power = i[0].zip_with(&i[3], |fc, lhv| fc * lhv / 3600.0)?;
            Ok(vec![to_mean_pressure(&fuel_power, &i[1], &i[2])?])
        })?;
    b.function("fc_from_pmf")
        .inputs(["/data/pmf", "/data/rpm", "/engine/capacity", "/engine/fuel_lhv"])
        .outputs(["/data/fc"])
        .register(|i: &Inputs| -> Output {
            let fuel_power = from_mean_pressure(&i[0], &i[1], &i[2])?;
            Ok(vec![fuel_power.zip_with(&i[3], |p, lhv| p * 3600.0 / lhv)?])
        })?;

    // fits
    b.function("fit_engine_map")
        .inputs(["/data/pmf", "/data/pme"])
        .outputs(ENGINE_MAP)
        .mode(Mode::Fast)
        .register(|i: &Inputs| -> Output { willans(i, least_squares) })?;
    b.function("fit_engine_map_robust")
        .inputs(["/data/pmf", "/data/pme"])
        .outputs(ENGINE_MAP)
        .priority(1)
        .mode(Mode::Robust)
        .register(|i: &Inputs| -> Output { willans(i, theil_sen) })?;

    b.build()
}

fn rpm_from_norm(i: &Inputs) -> Output {
    let idle = i.scalar(1)?;
    let rated = i.scalar(2)?;
    ensure!(rated > idle, "rated speed {rated} must exceed idle speed {idle}");
    Ok(vec![i[0].map(|norm| norm * (rated - idle) + idle)?])
}

fn fuel_lhv(i: &Inputs) -> Output {
    let fuel = i.text(0)?;
    match FUELS.iter().find(|(name, _)| name.eq_ignore_ascii_case(fuel)) {
        Some(&(_, lhv)) => Ok(vec![Value::Scalar(lhv)]),
        None => bail!("unknown fuel '{fuel}'"),
    }
}

/// Mean effective pressure (bar) of a four-stroke engine delivering `power`
/// (kW) at `rpm` with `capacity` (cm³).
fn to_mean_pressure(power: &Value, rpm: &Value, capacity: &Value) -> Result<Value, ValueError> {
    let swept = rpm.zip_with(capacity, |n, cc| n * cc / 1000.0)?;
    power.zip_with(&swept, |p, swept| 1200.0 * p / swept)
}

fn from_mean_pressure(pressure: &Value, rpm: &Value, capacity: &Value) -> Result<Value, ValueError> {
    let swept = rpm.zip_with(capacity, |n, cc| n * cc / 1000.0)?;
    pressure.zip_with(&swept, |pme, swept| pme * swept / 1200.0)
}

fn willans(i: &Inputs, fit: fn(&[f64], &[f64]) -> anyhow::Result<(f64, f64)>) -> Output {
    let pmf = i.vector(0)?;
    let pme = i.vector(1)?;
    ensure!(
        pmf.len() == pme.len(),
        "{} fuel points for {} work points",
        pmf.len(),
        pme.len()
    );
    ensure!(pmf.len() >= 2, "at least two points are needed, got {}", pmf.len());

    let (slope, intercept) = fit(pmf, pme)?;
    Ok(vec![Value::Scalar(slope), Value::Scalar(-intercept)])
}

/// Ordinary least squares line through the points.
fn least_squares(x: &[f64], y: &[f64]) -> anyhow::Result<(f64, f64)> {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let (sxy, sxx) = x.iter().zip(y).fold((0.0, 0.0), |(sxy, sxx), (&x, &y)| {
        let dx = x - mean_x;
        (sxy + dx * (y - mean_y), sxx + dx * dx)
    });

    ensure!(sxx > 0.0, "all fuel points are equal, the line is undetermined");

    let slope = sxy / sxx;
    Ok((slope, mean_y - slope * mean_x))
}

/// Theil-Sen line: the median of the pairwise slopes, then the median
/// intercept.
fn theil_sen(x: &[f64], y: &[f64]) -> anyhow::Result<(f64, f64)> {
    let mut slopes = Vec::new();
    for i in 0..x.len() {
        for j in i + 1..x.len() {
            if x[j] != x[i] {
                slopes.push((y[j] - y[i]) / (x[j] - x[i]));
            }
        }
    }

    let Some(slope) = median(&mut slopes) else {
        bail!("all fuel points are equal, the line is undetermined");
    };

    let mut intercepts: Vec<f64> = x.iter().zip(y).map(|(x, y)| y - slope * x).collect();
    let Some(intercept) = median(&mut intercepts) else {
        bail!("no points to fit");
    };

    Ok((slope, intercept))
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_validate_accepts_base_model() {
        let mut model = base_model();
        model.insert("/engine/capacity", 1998.0);
        model.insert("/engine/rpm_idle", 850.0);
        model.insert("/engine/rpm_rated", 4000.0);
        model.insert("/data/rpm", vec![1000.0, 2000.0]);
        assert_eq!(validate(&model), Ok(()));
    }

    #[test]
    fn test_validate_rejects_unknown_fuel() {
        let mut model = base_model();
        model.insert("/engine/fuel", "hydrogen");
        let err = validate(&model).unwrap_err();
        assert!(matches!(err, ModelError::UnknownFuel { ref fuel, .. } if fuel == "hydrogen"));
        assert!(err.to_string().contains("diesel, petrol"));
    }

    #[test]
    fn test_validate_checks_kinds() {
        let mut model = base_model();
        model.insert("/engine/capacity", "large");
        assert!(matches!(
            validate(&model),
            Err(ModelError::Kind { path, .. }) if path == Path::new("/engine/capacity")
        ));

        let mut model = base_model();
        model.insert("/data/rpm", 1000.0);
        assert!(matches!(validate(&model), Err(ModelError::Kind { .. })));

        let mut model = base_model();
        model.insert("/engine/fuel", 1.0);
        assert!(matches!(validate(&model), Err(ModelError::Kind { .. })));
    }

    #[test]
    fn test_validate_checks_ranges() {
        let mut model = base_model();
        model.insert("/engine/p_max", -10.0);
        assert!(matches!(validate(&model), Err(ModelError::NotPositive { .. })));

        let mut model = base_model();
        model.insert("/engine/rpm_idle", 4000.0);
        model.insert("/engine/rpm_rated", 850.0);
        assert_eq!(
            validate(&model),
            Err(ModelError::SpeedRange {
                idle: 4000.0,
                rated: 850.0
            })
        );
    }

    #[test]
    fn test_least_squares_exact_line() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y: Vec<f64> = x.iter().map(|x| 0.4 * x - 1.0).collect();
        let (slope, intercept) = least_squares(&x, &y).unwrap();
        assert!(close(slope, 0.4));
        assert!(close(intercept, -1.0));
    }

    #[test]
    fn test_theil_sen_ignores_outlier() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let mut y: Vec<f64> = x.iter().map(|x| 0.4 * x - 1.0).collect();
        y[4] = 100.0;

        let (slope, intercept) = theil_sen(&x, &y).unwrap();
        assert!(close(slope, 0.4));
        assert!(close(intercept, -1.0));

        let (slope, _) = least_squares(&x, &y).unwrap();
        assert!(!close(slope, 0.4));
    }

    #[test]
    fn test_degenerate_points() {
        let x = [2.0, 2.0, 2.0];
        let y = [1.0, 2.0, 3.0];
        assert!(least_squares(&x, &y).is_err());
        assert!(theil_sen(&x, &y).is_err());
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn test_mean_pressure_round_trip() {
        let p = Value::Scalar(100.0);
        let rpm = Value::Scalar(2000.0);
        let capacity = Value::Scalar(2000.0);

        let pme = to_mean_pressure(&p, &rpm, &capacity).unwrap();
        assert!(close(pme.as_scalar().unwrap(), 30.0));
        let back = from_mean_pressure(&pme, &rpm, &capacity).unwrap();
        assert!(close(back.as_scalar().unwrap(), 100.0));
    }

    #[test]
    fn test_registry_builds() {
        let graph = standard_registry().unwrap();
        assert!(graph.has_cycles());
        assert!(graph.find("fit_engine_map_robust").is_some());
    }
}
