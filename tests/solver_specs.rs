extern crate stem;
#[macro_use]
extern crate approx;

#[cfg(test)]
mod solver_specs {
    use std::sync::Arc;

    use stem::backend::Backend;
    use stem::device::{DeviceConfig, DeviceContext};
    use stem::error::Error;
    use stem::solver::*;
    use stem::solvers::SgdSolver;
    use stem::tensor::{SharedTensor, Tensor};

    fn parameter(values: Vec<f64>) -> SharedTensor<f64> {
        let dims = [1, 1, values.len(), 1];
        SharedTensor::from_tensor(Tensor::from_vec(&dims, values).unwrap())
    }

    fn values(tensor: &SharedTensor<f64>, backend: &Backend) -> Vec<f64> {
        tensor.read(backend).unwrap().into_vec()
    }

    #[test]
    // none: always return rate.
    fn lr_none() {
        let cfg = SolverConfig { learning_rate: 5.0, learning_rate_decay: 0.5, ..SolverConfig::default() };
        assert_eq!(cfg.get_learning_rate(0, 1), 5.0);
        assert_eq!(cfg.get_learning_rate(1000, 10), 5.0);
    }

    #[test]
    // step: return rate * decay ^ (floor(pattern / step_size))
    fn lr_step() {
        let cfg = SolverConfig { lr_policy: LRPolicy::StepDecay, learning_rate: 5.0, learning_rate_decay: 0.5,
                                 step_size: 10, ..SolverConfig::default() };
        assert_eq!(cfg.get_learning_rate(0, 1), 5.0);
        assert_eq!(cfg.get_learning_rate(9, 1), 5.0);
        assert_eq!(cfg.get_learning_rate(10, 1), 2.5);
        assert_eq!(cfg.get_learning_rate(5, 4), 1.25);
    }

    #[test]
    // exp: return rate * exp(-decay * pattern)
    fn lr_exp() {
        let cfg = SolverConfig { lr_policy: LRPolicy::ExponentialDecay, learning_rate: 2.0, learning_rate_decay: 0.1,
                                 ..SolverConfig::default() };
        assert_relative_eq!(cfg.get_learning_rate(10, 1), 2.0 * (-1.0f64).exp());
    }

    #[test]
    // inv_t: return rate / (1 + decay * pattern)
    fn lr_inv_t() {
        let cfg = SolverConfig { lr_policy: LRPolicy::InvTDecay, learning_rate: 3.0, learning_rate_decay: 0.5,
                                 ..SolverConfig::default() };
        assert_relative_eq!(cfg.get_learning_rate(4, 1), 1.0);
    }

    #[test]
    // poly: return rate * (1 - pattern / max_iterations) ^ power
    fn lr_poly() {
        let cfg = SolverConfig { lr_policy: LRPolicy::PolyDecay, learning_rate: 4.0, power: 2.0,
                                 max_iterations: 100, ..SolverConfig::default() };
        assert_relative_eq!(cfg.get_learning_rate(50, 1), 1.0);
        assert_eq!(cfg.get_learning_rate(200, 1), 0.0);
    }

    #[test]
    // inv: return rate * (1 + decay * pattern) ^ -power
    fn lr_inv() {
        let cfg = SolverConfig { lr_policy: LRPolicy::InvDecay, learning_rate: 8.0, learning_rate_decay: 1.0,
                                 power: 3.0, ..SolverConfig::default() };
        assert_relative_eq!(cfg.get_learning_rate(1, 1), 1.0);
    }

    #[test]
    fn policies_count_learned_stimuli() {
        let cfg = SolverConfig { lr_policy: LRPolicy::StepDecay, learning_rate: 1.0, learning_rate_decay: 0.5,
                                 step_size: 8, iteration_size: 2, ..SolverConfig::default() };
        assert_eq!(cfg.get_learning_rate(2, 2), 0.5);
    }

    #[test]
    fn instantiate_solver_sgd() {
        let cfg = SolverConfig { momentum: 0.9, ..SolverConfig::default() };
        let solver = cfg.solver.with_config::<f32>(Backend::Native, &cfg);
        assert_eq!(solver.iterations(), 0);
        assert_eq!(solver.config().momentum, 0.9);
    }

    #[test]
    fn zero_rate_leaves_everything_untouched() {
        let cfg = SolverConfig { learning_rate: 0.0, momentum: 0.9, decay: 0.1, ..SolverConfig::default() };
        let mut solver = SgdSolver::<f64>::new(Backend::Native, cfg);
        let mut data = parameter(vec![0.5, -0.5]);
        let diff = parameter(vec![1.0, 1.0]);
        solver.update(&mut data, &diff, 4).unwrap();
        assert_eq!(values(&data, &Backend::Native), vec![0.5, -0.5]);
        assert!(solver.history().is_none());
        assert_eq!(solver.iterations(), 1);
    }

    #[test]
    fn momentum_follows_a_geometric_series() {
        let momentum = 0.5;
        let cfg = SolverConfig { learning_rate: 0.1, momentum: momentum, ..SolverConfig::default() };
        let mut solver = SgdSolver::<f64>::new(Backend::Native, cfg);
        let mut data = parameter(vec![0.0]);
        let diff = parameter(vec![1.0]);

        let mut expected = 0.0;
        let mut step = 0.0;
        for _ in 0..5 {
            solver.update(&mut data, &diff, 1).unwrap();
            step = step * momentum + 0.1;
            expected += step;
            assert_relative_eq!(values(&data, &Backend::Native)[0], expected, epsilon = 1e-12);
        }
        assert_relative_eq!(step, 0.1 * (1.0 - momentum.powi(5)) / (1.0 - momentum), epsilon = 1e-12);
    }

    #[test]
    fn decay_pulls_towards_zero() {
        let cfg = SolverConfig { learning_rate: 0.1, decay: 0.5, ..SolverConfig::default() };
        let mut solver = SgdSolver::<f64>::new(Backend::Native, cfg);
        let mut data = parameter(vec![2.0]);
        let diff = parameter(vec![0.0]);
        solver.update(&mut data, &diff, 1).unwrap();
        assert_relative_eq!(values(&data, &Backend::Native)[0], 2.0 - 0.5 * 0.1 * 2.0);
    }

    #[test]
    fn iteration_size_scales_the_gradient() {
        let cfg = SolverConfig { learning_rate: 1.0, iteration_size: 2, ..SolverConfig::default() };
        let mut solver = SgdSolver::<f64>::new(Backend::Native, cfg);
        let mut data = parameter(vec![0.0]);
        solver.update(&mut data, &parameter(vec![8.0]), 4).unwrap();
        assert_relative_eq!(values(&data, &Backend::Native)[0], 1.0);
    }

    #[test]
    fn clamping_bounds_the_parameters() {
        let cfg = SolverConfig { learning_rate: 1.0, clamping: true, ..SolverConfig::default() };
        let mut solver = SgdSolver::<f64>::new(Backend::Native, cfg);
        let mut data = parameter(vec![0.5, -0.5, 0.0]);
        solver.update(&mut data, &parameter(vec![2.0, -2.0, 0.25]), 1).unwrap();
        assert_eq!(values(&data, &Backend::Native), vec![1.0, -1.0, 0.25]);
    }

    #[test]
    fn quantization_keeps_a_full_precision_copy() {
        let cfg = SolverConfig { learning_rate: 0.1, quantization_levels: 3, clamping: true, ..SolverConfig::default() };
        let mut solver = SgdSolver::<f64>::new(Backend::Native, cfg);
        let mut data = parameter(vec![0.0]);
        let diff = parameter(vec![1.0]);

        solver.update(&mut data, &diff, 1).unwrap();
        assert_eq!(values(&data, &Backend::Native), vec![0.0]);
        solver.update(&mut data, &diff, 1).unwrap();
        solver.update(&mut data, &diff, 1).unwrap();
        assert_eq!(values(&data, &Backend::Native), vec![0.5]);
        let continuous = solver.continuous().unwrap().read(&Backend::Native).unwrap();
        assert_relative_eq!(continuous.as_slice()[0], 0.3, epsilon = 1e-12);
    }

    #[test]
    fn binary_quantization_keeps_the_sign() {
        let cfg = SolverConfig { learning_rate: 1.0, quantization_levels: 1, ..SolverConfig::default() };
        let mut solver = SgdSolver::<f64>::new(Backend::Native, cfg);
        let mut data = parameter(vec![0.25, -0.25, 0.0]);
        solver.update(&mut data, &parameter(vec![0.5, -0.5, 0.0]), 1).unwrap();
        assert_eq!(values(&data, &Backend::Native), vec![1.0, -1.0, 0.0]);
    }

    #[test]
    fn mismatched_gradient_is_a_shape_error() {
        let mut solver = SgdSolver::<f64>::new(Backend::Native, SolverConfig::default());
        let mut data = parameter(vec![0.0, 1.0]);
        match solver.update(&mut data, &parameter(vec![1.0]), 1) {
            Err(Error::Shape(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn native_and_device_agree() {
        let cfg = SolverConfig { learning_rate: 0.05, momentum: 0.9, decay: 0.01, clamping: true,
                                 quantization_levels: 16, ..SolverConfig::default() };
        let device = Backend::device(&Arc::new(DeviceContext::new(DeviceConfig::default())));
        let initial = vec![0.3, -0.7, 0.95, 0.0];
        let gradients = [vec![1.0, 2.0, 3.0, -1.0], vec![-2.0, 0.5, 1.0, 4.0], vec![0.0, -3.0, 2.0, 1.0]];

        let run = |backend: Backend| -> (Vec<f64>, Vec<f64>) {
            let mut solver = SgdSolver::<f64>::new(backend.clone(), cfg.clone());
            let mut data = parameter(initial.clone());
            for gradient in &gradients {
                let mut diff = parameter(gradient.clone());
                diff.synchronize_to_device(&backend).unwrap();
                solver.update(&mut data, &diff, 2).unwrap();
            }
            let history = solver.history().unwrap().read(&backend).unwrap().into_vec();
            (values(&data, &backend), history)
        };
        let (native_data, native_history) = run(Backend::Native);
        let (device_data, device_history) = run(device);
        for (a, b) in native_data.iter().zip(&device_data) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
        for (a, b) in native_history.iter().zip(&device_history) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }
}
