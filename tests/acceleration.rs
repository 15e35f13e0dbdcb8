mod util;
use mesh_coupling::acceleration::{
    Accelerate, Acceleration, AccelerationConfig, AccelerationKind, FilterKind, IqnIls,
    PreconditionerConfig, PreconditionerKind,
};
use mesh_coupling::data::coupling_data::{DataId, DataMap};
use nalgebra::{DMatrix, DVector};
use util::*;

fn build(json: &str) -> Acceleration {
    let cfg: AccelerationConfig = serde_json::from_str(json).expect("valid config json");
    let mut acc = cfg.build().expect("valid config");
    acc.initialize(&data_map(&[(0, &[0.0])])).expect("block 0 present");
    acc
}

fn first(data: &DataMap) -> f64 {
    data[&DataId(0)].values[0]
}

#[test]
fn constant_relaxation_worked_example() {
    let mut acc = build(r#"{"kind": "constant", "initial_relaxation": 0.5, "data_ids": [0]}"#);
    let mut data = data_map(&[(0, &[40.0])]);
    acc.perform_acceleration(&mut data).unwrap();
    assert_eq!(first(&data), 20.0);
    set_values(&mut data, 0, &[30.0]);
    acc.perform_acceleration(&mut data).unwrap();
    assert_eq!(first(&data), 25.0);
}

#[test]
fn aitken_worked_example() {
    let mut acc = build(r#"{"kind": "aitken", "initial_relaxation": 0.5, "data_ids": [0]}"#);
    let mut data = data_map(&[(0, &[40.0])]);
    acc.perform_acceleration(&mut data).unwrap();
    assert_eq!(first(&data), 20.0);
    set_values(&mut data, 0, &[30.0]);
    acc.perform_acceleration(&mut data).unwrap();
    assert_close(first(&data), 26.666_666_666_666_668, 1e-9);
}

#[test]
fn iqn_ils_worked_example() {
    let mut acc = build(r#"{"kind": "iqn-ils", "initial_relaxation": 0.1, "data_ids": [0]}"#);
    let mut data = data_map(&[(0, &[40.0])]);
    acc.perform_acceleration(&mut data).unwrap();
    assert_close(first(&data), 4.0, 1e-12);
    set_values(&mut data, 0, &[30.0]);
    acc.perform_acceleration(&mut data).unwrap();
    assert_close(first(&data), 11.428_571_428_571_429, 1e-9);
}

#[test]
fn first_call_is_plain_relaxation() {
    for kind in ["constant", "aitken", "iqn-ils"] {
        let mut acc = build(&format!(
            r#"{{"kind": "{kind}", "initial_relaxation": 0.3, "data_ids": [0]}}"#
        ));
        let mut data = data_map(&[(0, &[0.0])]);
        let block = data.get_mut(&DataId(0)).unwrap();
        block.values[0] = 7.0;
        block.old_values[0] = 2.0;
        acc.perform_acceleration(&mut data).unwrap();
        assert!((first(&data) - 3.5).abs() < 1e-12, "{kind}: {}", first(&data));
    }
}

#[test]
fn empty_history_budget_always_relaxes() {
    let cfg = AccelerationConfig {
        data_ids: vec![DataId(0)],
        initial_relaxation: 0.4,
        max_iterations_used: 0,
        ..AccelerationConfig::default()
    };
    let mut acc = IqnIls::from_config(&cfg);
    let mut data = data_map(&[(0, &[0.0, 0.0])]);
    acc.initialize(&data).unwrap();
    for step in 0..4 {
        let block = data.get_mut(&DataId(0)).unwrap();
        block.values = DVector::from_vec(vec![10.0 + step as f64, -3.0]);
        let expected = &block.old_values + (&block.values - &block.old_values) * 0.4;
        acc.perform_acceleration(&mut data).unwrap();
        assert_eq!(data[&DataId(0)].values, expected);
        assert_eq!(acc.columns(), 0);
    }
}

#[test]
fn remeshing_matches_a_fresh_instance() {
    for kind in ["constant", "aitken", "iqn-ils"] {
        let json = format!(r#"{{"kind": "{kind}", "initial_relaxation": 0.5, "data_ids": [0]}}"#);
        let mut acc = build(&json);
        let mut data = data_map(&[(0, &[40.0])]);
        acc.perform_acceleration(&mut data).unwrap();
        set_values(&mut data, 0, &[30.0]);
        acc.perform_acceleration(&mut data).unwrap();

        let mut remeshed = data_map(&[(0, &[12.0, -4.0, 8.0])]);
        let mut fresh_data = remeshed.clone();
        let mut fresh = build(&json);
        acc.perform_acceleration(&mut remeshed).unwrap();
        fresh.perform_acceleration(&mut fresh_data).unwrap();
        assert_eq!(remeshed, fresh_data, "{kind}");
    }
}

/// Linear fixed-point problem `x = M x + b` whose plain iteration diverges.
fn solver(x: &DVector<f64>) -> DVector<f64> {
    let m = DMatrix::from_row_slice(3, 3, &[-1.5, 0.2, 0.0, 0.1, 0.5, 0.3, 0.0, -0.4, -1.2]);
    let b = DVector::from_vec(vec![1.0, -2.0, 0.5]);
    m * x + b
}

#[test]
fn iqn_ils_converges_on_a_diverging_linear_problem() {
    let cfg = AccelerationConfig {
        data_ids: vec![DataId(0)],
        ..AccelerationConfig::default()
    };
    let mut acc = IqnIls::from_config(&cfg);
    let mut data = data_map(&[(0, &[0.0, 0.0, 0.0])]);
    acc.initialize(&data).unwrap();

    let mut converged = None;
    for it in 0..30 {
        let block = data.get_mut(&DataId(0)).unwrap();
        block.values = solver(&block.old_values);
        let residual = block.residual().norm();
        if residual < 1e-9 {
            converged = Some(it);
            break;
        }
        acc.perform_acceleration(&mut data).unwrap();
    }
    let it = converged.expect("IQN-ILS did not converge");
    assert!(it <= 12, "took {it} iterations");
    let x = &data[&DataId(0)].values;
    assert!((solver(x) - x).norm() < 1e-8);
}

#[test]
fn history_is_capped_and_windows_are_dropped() {
    let cfg = AccelerationConfig {
        data_ids: vec![DataId(0)],
        max_iterations_used: 3,
        timesteps_reused: 1,
        filter: FilterKind::None,
        ..AccelerationConfig::default()
    };
    let mut acc = IqnIls::from_config(&cfg);
    let mut data = data_map(&[(0, &[0.0, 0.0, 0.0])]);
    acc.initialize(&data).unwrap();

    for window in 0..3 {
        for it in 0..6 {
            let block = data.get_mut(&DataId(0)).unwrap();
            let shift = (window * 10 + it) as f64;
            block.values = solver(&block.old_values).add_scalar(0.01 * shift);
            acc.perform_acceleration(&mut data).unwrap();
            assert!(acc.columns() <= 3);
            assert_eq!(acc.window_columns().iter().sum::<usize>(), acc.columns());
        }
        acc.iterations_converged(&data).unwrap();
        // the finished window plus the (empty) new one
        assert!(acc.window_columns().len() <= 2, "{:?}", acc.window_columns());
        assert_eq!(acc.window_columns().last(), Some(&0));
    }
}

#[test]
fn preconditioned_two_block_run() {
    let cfg = AccelerationConfig {
        data_ids: vec![DataId(0), DataId(1)],
        preconditioner: PreconditionerConfig {
            kind: PreconditionerKind::ResidualSum,
            ..PreconditionerConfig::default()
        },
        ..AccelerationConfig::default()
    };
    let mut acc = IqnIls::from_config(&cfg);
    let mut data = data_map(&[(0, &[0.0, 0.0]), (1, &[0.0])]);
    acc.initialize(&data).unwrap();

    for _ in 0..2 {
        for it in 0..4 {
            let x = DVector::from_vec(vec![
                data[&DataId(0)].old_values[0],
                data[&DataId(0)].old_values[1],
                data[&DataId(1)].old_values[0] * 1e3,
            ]);
            let y = solver(&x);
            set_values(&mut data, 0, &[y[0], y[1] + it as f64]);
            set_values(&mut data, 1, &[y[2] * 1e-3]);
            acc.perform_acceleration(&mut data).unwrap();
            for block in data.values() {
                assert!(block.values.iter().all(|v| v.is_finite()));
            }
        }
        acc.iterations_converged(&data).unwrap();
    }
    assert!(acc.preconditioner().weights().iter().all(|w| *w > 0.0));
}

#[test]
fn kind_defaults_to_iqn_ils() {
    let cfg: AccelerationConfig = serde_json::from_str(r#"{"data_ids": [3]}"#).unwrap();
    assert_eq!(cfg.kind, AccelerationKind::IqnIls);
    assert!(matches!(cfg.build().unwrap(), Acceleration::IqnIls(_)));
}
