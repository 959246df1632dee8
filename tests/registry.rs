use std::f64::consts::TAU;

use keisan::models::{ENGINE_MAP, base_model, standard_registry, validate};
use keisan::{
    Calculation, ExecuteOptions, Mode, ModelError, Path, RequestState, ResolutionError,
    ResolveOptions, RunState, Value, ValueStore, execute, resolve,
};

const RPM: [f64; 5] = [1000.0, 1500.0, 2000.0, 2500.0, 3000.0];
const CAPACITY: f64 = 2000.0;
const DIESEL_LHV: f64 = 42.7;

/// Measurements of an engine whose Willans line is `pme = 0.4 * pmf - 1`,
/// given as speed, torque and fuel consumption.
fn measurements(pme: &[f64]) -> ValueStore {
    let pmf: Vec<f64> = pme.iter().map(|pme| (pme + 1.0) / 0.4).collect();
    let swept: Vec<f64> = RPM.iter().map(|n| n * CAPACITY / 1000.0).collect();

    let torque = pme
        .iter()
        .zip(&swept)
        .zip(RPM)
        .map(|((pme, swept), n)| {
            let p = pme * swept / 1200.0;
            p * 1000.0 / (n * TAU / 60.0)
        })
        .collect::<Vec<_>>();

    let fc = pmf
        .iter()
        .zip(&swept)
        .map(|(pmf, swept)| pmf * swept / 1200.0 * 3600.0 / DIESEL_LHV)
        .collect::<Vec<_>>();

    let mut store = base_model();
    store.insert("/engine/capacity", CAPACITY);
    store.insert("/data/rpm", RPM.to_vec());
    store.insert("/data/t", torque);
    store.insert("/data/fc", fc);
    store
}

fn scalar(store: &ValueStore, path: &str) -> f64 {
    store.get(&Path::new(path)).unwrap().as_scalar().unwrap()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

#[test]
fn fits_engine_map_from_speed_torque_and_fuel() {
    let graph = standard_registry().unwrap();
    let mut store = measurements(&[4.0, 6.0, 8.0, 10.0, 12.0]);

    let plan = resolve(&graph, store.paths(), ENGINE_MAP, &Default::default()).unwrap();
    let mut names = plan.names(&graph);
    names.sort();
    assert_eq!(
        names,
        [
            "fit_engine_map",
            "fuel_lhv",
            "omega_from_rpm",
            "p_from_torque",
            "pme_from_p",
            "pmf_from_fc",
        ]
    );

    let position = |name: &str| plan.names(&graph).iter().position(|n| *n == name).unwrap();
    assert!(position("omega_from_rpm") < position("p_from_torque"));
    assert!(position("p_from_torque") < position("pme_from_p"));
    assert!(position("fuel_lhv") < position("pmf_from_fc"));
    assert!(position("pme_from_p") < position("fit_engine_map"));
    assert!(position("pmf_from_fc") < position("fit_engine_map"));

    let report = execute(&graph, &plan, &mut store, &Default::default());
    assert_eq!(report.state, RunState::Completed);
    assert!(close(scalar(&store, "/engine_map/a"), 0.4));
    assert!(close(scalar(&store, "/engine_map/b"), 1.0));
}

#[test]
fn robust_mode_selects_robust_fit() {
    let graph = standard_registry().unwrap();
    let mut pme = vec![4.0, 6.0, 8.0, 10.0, 12.0];
    let mut store = measurements(&pme);

    // a single bad torque reading
    pme[4] = 30.0;
    let outlier = measurements(&pme);
    store.insert("/data/t", outlier.get(&Path::new("/data/t")).unwrap().clone());

    let options = ResolveOptions::default().prefer_mode(Mode::Robust);
    let plan = resolve(&graph, store.paths(), ENGINE_MAP, &options).unwrap();
    let fit = graph.find("fit_engine_map_robust").unwrap();
    assert_eq!(plan.producer_of(&Path::new("/engine_map/a")), Some(fit));
    assert!(!plan.names(&graph).contains(&"fit_engine_map"));

    let mut fast_store = store.clone();
    execute(&graph, &plan, &mut store, &Default::default());
    assert!(close(scalar(&store, "/engine_map/a"), 0.4));
    assert!(close(scalar(&store, "/engine_map/b"), 1.0));

    let fast = resolve(&graph, fast_store.paths(), ENGINE_MAP, &Default::default()).unwrap();
    execute(&graph, &fast, &mut fast_store, &Default::default());
    assert!(!close(scalar(&fast_store, "/engine_map/a"), 0.4));
}

#[test]
fn speed_given_as_angular_velocity() {
    let graph = standard_registry().unwrap();
    let mut store = measurements(&[4.0, 6.0, 8.0, 10.0, 12.0]);
    let rpm = store.remove(&Path::new("/data/rpm")).unwrap();
    store.insert("/data/omega", rpm.map(|n| n * TAU / 60.0).unwrap());

    let plan = resolve(&graph, store.paths(), ENGINE_MAP, &Default::default()).unwrap();
    let names = plan.names(&graph);
    assert!(names.contains(&"rpm_from_omega"));
    assert!(!names.contains(&"omega_from_rpm"));

    let report = execute(&graph, &plan, &mut store, &Default::default());
    assert!(report.is_complete());
    assert!(close(scalar(&store, "/engine_map/a"), 0.4));
}

#[test]
fn missing_work_quantity_is_reported() {
    let graph = standard_registry().unwrap();
    let mut store = measurements(&[4.0, 6.0, 8.0, 10.0, 12.0]);
    store.remove(&Path::new("/data/t"));

    let err = resolve(&graph, store.paths(), ENGINE_MAP, &Default::default()).unwrap_err();
    let ResolutionError::MissingInput(err) = err else {
        panic!("expected a missing input, got {err}");
    };
    assert_eq!(err.path, Path::new("/engine_map/a"));
    assert!(
        err.chain
            .to_string()
            .starts_with("/engine_map/a <- fit_engine_map() <- /data/pme"),
        "{}",
        err.chain
    );
}

#[test]
fn missing_speed_is_not_a_cycle() {
    let graph = standard_registry().unwrap();
    let mut store = measurements(&[4.0, 6.0, 8.0, 10.0, 12.0]);
    store.remove(&Path::new("/data/rpm"));

    let err = resolve(&graph, store.paths(), ENGINE_MAP, &Default::default()).unwrap_err();
    let ResolutionError::MissingInput(err) = err else {
        panic!("expected a missing input, got {err}");
    };
    assert_eq!(
        err.chain.to_string(),
        "/engine_map/a <- fit_engine_map() <- /data/pmf <- pmf_from_fc() <- /data/rpm \
         <- rpm_from_norm() <- /data/rpm_norm"
    );
}

#[test]
fn measured_model_validates() {
    let mut store = measurements(&[4.0, 6.0, 8.0, 10.0, 12.0]);
    assert_eq!(validate(&store), Ok(()));

    store.insert("/engine/fuel", "hydrogen");
    assert!(matches!(
        validate(&store),
        Err(ModelError::UnknownFuel { fuel, .. }) if fuel == "hydrogen"
    ));
}

#[test]
fn unknown_fuel_fails_only_the_fuel_branch() {
    let graph = standard_registry().unwrap();
    let mut store = measurements(&[4.0, 6.0, 8.0, 10.0, 12.0]);
    store.insert("/engine/fuel", "hydrogen");

    let mut desired = vec![Path::new("/data/pme")];
    desired.extend(ENGINE_MAP.iter().map(Path::new));

    let mut calc = Calculation::new(&graph, store, desired);
    let report = calc
        .run(&Default::default(), &ExecuteOptions::default().parallel(true))
        .unwrap();

    let failed: Vec<_> = report
        .failed
        .iter()
        .map(|f| f.error.function.to_string())
        .collect();
    assert_eq!(failed, ["fuel_lhv"]);
    assert!(report.failed[0].error.to_string().contains("hydrogen"));
    assert_eq!(report.skipped.len(), 2);
    assert!(report.partial_failure().is_some());
    assert_eq!(calc.state(), RequestState::PartiallyCompleted);

    let store = calc.into_store();
    assert!(store.contains(&Path::new("/data/pme")));
    assert!(!store.contains(&Path::new("/engine_map/a")));
}

#[test]
fn parallel_run_matches_sequential() {
    let graph = standard_registry().unwrap();
    let initial = measurements(&[4.0, 6.0, 8.0, 10.0, 12.0]);
    let plan = resolve(&graph, initial.paths(), ENGINE_MAP, &Default::default()).unwrap();

    let mut sequential = initial.clone();
    let a = execute(&graph, &plan, &mut sequential, &Default::default());

    let mut parallel = initial.clone();
    let b = execute(&graph, &plan, &mut parallel, &ExecuteOptions::default().parallel(true));

    assert_eq!(a.succeeded, b.succeeded);
    assert_eq!(a.produced_values, b.produced_values);
    assert_eq!(sequential, parallel);
}

#[test]
fn values_round_trip_through_json() {
    let graph = standard_registry().unwrap();
    let doc = serde_json::json!({
        "engine": { "capacity": CAPACITY, "fuel": "diesel" },
        "data": {
            "rpm": RPM,
            "p": [30.0, 45.0, 60.0, 75.0, 90.0],
        },
    });

    let store = keisan::io::flatten(&doc).unwrap();
    let mut calc = Calculation::new(&graph, store, ["/data/pme"]);
    calc.run(&Default::default(), &Default::default()).unwrap();

    let out = keisan::io::unflatten(calc.store()).unwrap();
    let pme = out["data"]["pme"].as_array().unwrap();
    assert_eq!(pme.len(), 5);
    assert!(pme.iter().all(|v| close(v.as_f64().unwrap(), 18.0)));
    assert_eq!(
        calc.store().get(&Path::new("/engine/fuel")),
        Some(&Value::from("diesel"))
    );
}
