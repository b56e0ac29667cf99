extern crate env_logger;
extern crate stem;
#[macro_use]
extern crate approx;
extern crate tempfile;

#[cfg(test)]
mod network_spec {
    use std::sync::Arc;

    use stem::backend::Backend;
    use stem::cells::batch_norm::shared_parameter;
    use stem::cells::{BatchNormCell, BatchNormConfig};
    use stem::database::{Database, LabelDatabase, StimuliBatch, StimuliSet};
    use stem::error::Error;
    use stem::network::*;
    use stem::solver::SolverConfig;
    use stem::target::{Target, TargetConfig};
    use stem::tensor::{SharedTensor, Tensor};
    use stem::util::{arc_lock, ArcLock};

    type Shared = ArcLock<SharedTensor<f64>>;

    struct Fixture {
        network: Network<f64>,
        target: Target,
        provider: StimuliBatch,
        scales: Vec<Shared>,
        input_gradient: Shared,
    }

    fn input_data() -> Tensor<f64> {
        let values = (0..32).map(|i| ((i * 7) % 11) as f64 / 5.0 - 1.0).collect();
        Tensor::from_vec(&[2, 2, 2, 4], values).unwrap()
    }

    fn fixture(iteration_size: usize) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let solver = SolverConfig { learning_rate: 0.1, momentum: 0.5, iteration_size: iteration_size,
                                    ..SolverConfig::default() };
        let config = BatchNormConfig { scale_solver: solver.clone(), bias_solver: solver, ..BatchNormConfig::default() };
        let mut network = Network::new(NetworkConfig { iteration_size: iteration_size, ..NetworkConfig::default() })
            .unwrap();

        let mut scales = Vec::new();
        let mut ids = Vec::new();
        for (name, scale) in &[("bn1", vec![1.0, 0.5]), ("bn2", vec![0.8, 1.2])] {
            let mut cell = BatchNormCell::<f64>::new(name, 2, config.clone(), Backend::Native);
            let scale = shared_parameter(scale.clone()).unwrap();
            cell.set_scale(scale.clone());
            scales.push(scale);
            ids.push(network.add_cell(Box::new(cell)).unwrap());
        }
        let input_gradient = network.bind_input(ids[0], arc_lock(SharedTensor::from_tensor(input_data()))).unwrap();
        network.connect(ids[0], ids[1]).unwrap();
        network.initialize().unwrap();

        let db: Arc<dyn Database> = Arc::new(LabelDatabase::new(vec!["a", "b"]));
        let labels = Tensor::from_vec(&[2, 2, 1, 4], (0..16).map(|i| (i % 3 == 0) as i32).collect()).unwrap();
        let provider = StimuliBatch::new(db.clone(), vec![0, 1, 2, 3], labels).unwrap();
        let target = Target::new::<f64>("out", network.cell(ids[1]).unwrap(), TargetConfig::default(), &*db).unwrap();
        Fixture { network: network, target: target, provider: provider, scales: scales,
                  input_gradient: input_gradient }
    }

    fn pass(fixture: &mut Fixture) {
        fixture.network.propagate(false).unwrap();
        let id = fixture.network.find("bn2").unwrap();
        let cell = fixture.network.cell_mut(id).unwrap();
        fixture.target.process::<f64>(cell, &fixture.provider, StimuliSet::Learn).unwrap();
        fixture.network.back_propagate().unwrap();
    }

    fn scales(fixture: &Fixture) -> Vec<Vec<f64>> {
        fixture.scales.iter().map(|scale| scale.read().read(&Backend::Native).unwrap().into_vec()).collect()
    }

    #[test]
    fn connections_follow_the_execution_order() {
        let mut network = Network::<f64>::new(NetworkConfig::default()).unwrap();
        let a = network.add_cell(Box::new(BatchNormCell::new("a", 1, BatchNormConfig::default(), Backend::Native)))
            .unwrap();
        let b = network.add_cell(Box::new(BatchNormCell::new("b", 1, BatchNormConfig::default(), Backend::Native)))
            .unwrap();
        assert_eq!(network.find("b"), Some(b));
        assert!(network.connect(b, a).is_err());
        assert!(network.connect(a, a).is_err());
        match network.add_cell(Box::new(BatchNormCell::new("a", 1, BatchNormConfig::default(), Backend::Native))) {
            Err(Error::Config(_)) => {}
            other => panic!("unexpected {:?}", other.map(|id| id.index())),
        }
        assert!(network.propagate(true).is_err());
    }

    #[test]
    fn update_waits_for_the_iteration_size() {
        let mut fixture = fixture(2);
        let initial = scales(&fixture);
        pass(&mut fixture);
        assert!(!fixture.network.update().unwrap());
        assert_eq!(scales(&fixture), initial);
        pass(&mut fixture);
        assert_eq!(fixture.network.passes(), 2);
        assert!(fixture.network.update().unwrap());
        assert_eq!(fixture.network.passes(), 0);
        assert_ne!(scales(&fixture), initial);
    }

    #[test]
    fn accumulated_passes_match_a_single_pass() {
        let mut single = fixture(1);
        pass(&mut single);
        assert!(single.network.update().unwrap());

        let mut accumulated = fixture(2);
        pass(&mut accumulated);
        pass(&mut accumulated);
        assert!(accumulated.network.update().unwrap());

        for (a, b) in scales(&single).iter().flatten().zip(scales(&accumulated).iter().flatten()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12, max_relative = 1e-12);
        }
        assert_eq!(single.target.loss().len(), 1);
        assert_eq!(accumulated.target.loss().len(), 2);
    }

    #[test]
    fn input_gradient_holds_the_last_pass_only() {
        let mut fixture = fixture(2);
        let gradient = |fixture: &Fixture| fixture.input_gradient.read().read(&Backend::Native).unwrap().into_vec();
        pass(&mut fixture);
        let first = gradient(&fixture);
        assert!(first.iter().any(|&g| g != 0.0));
        assert!(fixture.input_gradient.read().is_valid());

        pass(&mut fixture);
        for (a, b) in first.iter().zip(gradient(&fixture)) {
            assert_relative_eq!(*a, b, epsilon = 1e-12, max_relative = 1e-12);
        }
    }

    #[test]
    fn save_and_load_every_cell() {
        let dir = tempfile::tempdir().unwrap();
        let mut trained = fixture(1);
        pass(&mut trained);
        trained.network.update().unwrap();
        trained.network.save(&dir.path().join("params")).unwrap();

        let mut restored = fixture(1);
        restored.network.load(&dir.path().join("params"), false).unwrap();
        assert_eq!(scales(&restored), scales(&trained));

        let mut fresh = fixture(1);
        fresh.network.load(&dir.path().join("missing"), true).unwrap();
        assert!(fresh.network.load(&dir.path().join("missing"), false).is_err());
    }
}
