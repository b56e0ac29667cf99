extern crate env_logger;
extern crate stem;
#[macro_use]
extern crate approx;
extern crate tempfile;

#[cfg(test)]
mod target_spec {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    use stem::backend::Backend;
    use stem::cell::{GradientMode, ICell};
    use stem::database::{Database, LabelDatabase, StimuliBatch, StimuliSet};
    use stem::error::{Error, Result};
    use stem::target::*;
    use stem::tensor::{SharedTensor, Tensor};
    use stem::util::{arc_lock, ArcLock};

    type Shared = ArcLock<SharedTensor<f64>>;

    /// A cell whose outputs are set by the test.
    struct FixedCell {
        name: String,
        backend: Backend,
        outputs: Shared,
        diff_inputs: Shared,
    }

    impl FixedCell {
        fn new(outputs: Tensor<f64>) -> FixedCell {
            let dims = outputs.dims().to_vec();
            FixedCell {
                name: "fc".to_owned(),
                backend: Backend::Native,
                outputs: arc_lock(SharedTensor::from_tensor(outputs)),
                diff_inputs: arc_lock(SharedTensor::new(&dims)),
            }
        }

        fn set_outputs(&self, outputs: Tensor<f64>) {
            self.outputs.write().assign(outputs).unwrap();
        }
    }

    impl ICell<f64> for FixedCell {
        fn name(&self) -> &str { &self.name }
        fn cell_type(&self) -> &'static str { "Fixed" }
        fn nb_outputs(&self) -> usize { self.outputs.read().dim_z() }
        fn outputs_width(&self) -> usize { self.outputs.read().dim_x() }
        fn outputs_height(&self) -> usize { self.outputs.read().dim_y() }
        fn backend(&self) -> &Backend { &self.backend }
        fn add_input(&mut self, _: Shared, _: Shared) -> Result<()> { Ok(()) }
        fn initialize(&mut self) -> Result<()> { Ok(()) }
        fn propagate(&mut self, _: bool) -> Result<()> { Ok(()) }
        fn back_propagate(&mut self, _: GradientMode) -> Result<()> { Ok(()) }
        fn update(&mut self) -> Result<()> { Ok(()) }
        fn outputs(&self) -> Shared { self.outputs.clone() }
        fn diff_inputs(&self) -> Shared { self.diff_inputs.clone() }
        fn save(&self, _: &Path) -> Result<()> { Ok(()) }
        fn load(&mut self, _: &Path, _: bool) -> Result<()> { Ok(()) }
    }

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn database() -> Arc<LabelDatabase> {
        let mut db = LabelDatabase::new(vec!["cat", "dog", "bird", "fish"]);
        for id in 0..8 {
            db.add_stimulus(&format!("s{}", id), id % 3);
        }
        Arc::new(db)
    }

    /// Outputs `[1, 1, nb_outputs, batch]` where `estimates[b]` is the largest.
    fn one_hot(nb_outputs: usize, estimates: &[usize]) -> Tensor<f64> {
        let mut outputs = Tensor::filled(&[1, 1, nb_outputs, estimates.len()], 0.1);
        for (b, &e) in estimates.iter().enumerate() {
            outputs.set(0, 0, e, b, 0.9);
        }
        outputs
    }

    fn labels(values: &[i32]) -> Tensor<i32> {
        Tensor::from_vec(&[1, 1, 1, values.len()], values.to_vec()).unwrap()
    }

    fn batch(db: &Arc<LabelDatabase>, ids: &[i32], labels: Tensor<i32>) -> StimuliBatch {
        let db: Arc<dyn Database> = db.clone();
        StimuliBatch::new(db, ids.to_vec(), labels).unwrap()
    }

    fn target(cell: &FixedCell, config: TargetConfig, db: &LabelDatabase) -> Target {
        Target::new::<f64>("target", cell, config, db).unwrap()
    }

    fn score(cell: &FixedCell, config: TargetConfig, db: &LabelDatabase) -> TargetScore {
        TargetScore::new(target(cell, config, db))
    }

    #[test]
    fn mapping_file_with_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.dat");
        fs::write(&path, "# classes\ncat 0\ndog 1\n\ndefault 2   # everything else\n").unwrap();
        let db = database();
        let cell = FixedCell::new(one_hot(3, &[0]));
        let config = TargetConfig { labels_mapping: Some(path), ..TargetConfig::default() };
        let target = target(&cell, config, &*db);

        let targets: Vec<i32> = (0..4).map(|label| target.get_label_target(label, &*db).unwrap()).collect();
        assert_eq!(targets, vec![0, 1, 2, 2]);
        assert_eq!(target.get_default_target().unwrap(), 2);
        assert_eq!(target.get_target_labels(2), Vec::<i32>::new());
        assert_eq!(target.get_target_labels_name(&*db), vec!["cat", "dog", "default"]);
    }

    #[test]
    fn several_labels_share_a_target_name() {
        let db = database();
        let cell = FixedCell::new(one_hot(2, &[0]));
        let mut target = target(&cell, TargetConfig::default(), &*db);
        target.set_label_target(1, 0);
        target.set_label_target(0, 0);
        target.set_label_target(-1, 1);
        assert_eq!(target.get_target_labels(0), vec![0, 1]);
        assert_eq!(target.get_target_labels_name(&*db), vec!["cat...", "*"]);
    }

    #[test]
    fn mapping_errors() {
        let db = database();
        let parse = |text: &str| LabelsMapping::parse(text, "mapping", &*db);
        for text in &["default 0\ndefault 1", "cat 0\ncat 1", "cat zero", "cat -2"] {
            match parse(*text) {
                Err(Error::Config(_)) => {}
                other => panic!("{:?} for {:?}", other, text),
            }
        }
        let mapping = parse("cat 0\ndog 1").unwrap();
        match mapping.get_label_target(2, &*db) {
            Err(Error::Config(message)) => assert!(message.contains("bird")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse("whale 0").unwrap().is_empty());

        let ambiguous = LabelDatabase::new(vec!["*", "c*t", "cat"]);
        assert!(LabelsMapping::parse("* -1", "mapping", &ambiguous).is_err());
        assert!(LabelsMapping::parse("c*t 0", "mapping", &ambiguous).is_err());
    }

    #[test]
    fn padding_slot_is_excluded() {
        init_logger();
        let db = database();
        let mut cell = FixedCell::new(one_hot(3, &[0, 1, 0, 2]));
        let mut score = score(&cell, TargetConfig::default(), &*db);
        let provider = batch(&db, &[0, 1, 2, -1], labels(&[0, 1, 2, 0]));
        score.process::<f64>(&mut cell, &provider, StimuliSet::Test).unwrap();

        assert_eq!(score.target().state(), TargetState::ScoreComputed);
        assert_eq!(score.get_batch_success().len(), 4);
        assert_relative_eq!(score.get_batch_average_success(), 2.0 / 3.0, epsilon = 1e-12);
        let matrix = score.get_confusion_matrix(StimuliSet::Test);
        assert_eq!(matrix.total(), 3);
        assert_eq!(matrix.get(2, 0), 1);
        assert_eq!(score.get_misclassified(StimuliSet::Test), &[(2, 0)]);
        assert!(score.get_confusion_matrix(StimuliSet::Learn).is_empty());
    }

    #[test]
    fn ignored_sample_does_not_count() {
        let db = database();
        let mut cell = FixedCell::new(one_hot(2, &[0, 1]));
        let mut score = score(&cell, TargetConfig::default(), &*db);
        score.target_mut().set_label_target(0, 0);
        score.target_mut().set_label_target(1, 1);
        score.target_mut().set_label_target(-1, -1);

        let provider = batch(&db, &[1, 2], labels(&[1, 2]));
        score.process::<f64>(&mut cell, &provider, StimuliSet::Test).unwrap();

        assert_eq!(score.target().targets().as_slice(), &[1, -1]);
        assert_eq!(score.get_batch_success(), &[0.0, 0.0]);
        assert_eq!(score.get_batch_average_success(), 0.0);
        assert_eq!(score.get_average_success(StimuliSet::Test, 0), 0.0);
        assert_eq!(score.get_confusion_matrix(StimuliSet::Test).total(), 1);
        assert_eq!(score.get_misclassified(StimuliSet::Test), &[(1, 0)]);
    }

    #[test]
    fn last_batch_correction_keeps_the_exact_mean() {
        let db = database();
        let mut cell = FixedCell::new(one_hot(3, &[0, 1, 2, 1]));
        let mut score = score(&cell, TargetConfig::default(), &*db);

        let first = batch(&db, &[0, 1, 2, 3], labels(&[0, 1, 2, 0]));
        score.process::<f64>(&mut cell, &first, StimuliSet::Validation).unwrap();
        assert_eq!(score.get_batch_average_success(), 0.75);

        cell.set_outputs(one_hot(3, &[1, 0, 0, 0]));
        let last = batch(&db, &[4, 5, -1, -1], labels(&[1, 2, 0, 0]));
        score.process::<f64>(&mut cell, &last, StimuliSet::Validation).unwrap();

        let success = &score.get_score(StimuliSet::Validation).success;
        assert_eq!(success.len(), 2);
        assert_relative_eq!(success[1], 7.0 / 12.0, epsilon = 1e-12);
        assert_relative_eq!(score.get_average_success(StimuliSet::Validation, 0), 4.0 / 6.0, epsilon = 1e-12);
        assert_relative_eq!(score.get_average_success(StimuliSet::Validation, 1), 7.0 / 12.0, epsilon = 1e-12);
    }

    #[test]
    fn correction_of_a_single_partial_batch() {
        let mut batch_success = vec![1.0, -1.0, 0.0, 1.0];
        stem::target::score::correct_last_batch(&mut batch_success, &Default::default());
        assert_eq!(batch_success.len(), 4);
        let average: f64 = batch_success.iter().sum::<f64>() / 4.0;
        assert_relative_eq!(average, 2.0 / 3.0, epsilon = 1e-12);
    }

    fn region_labels() -> Tensor<i32> {
        let rows = vec![
            0, 0, 2, 2,
            1, 1, 2, 1,
            -1, -1, 0, 0,
            1, 2, 0, 2,
        ];
        Tensor::from_vec(&[4, 4, 1, 1], rows).unwrap()
    }

    #[test]
    fn lower_resolution_takes_the_region_majority() {
        let db = database();
        let mut cell = FixedCell::new(Tensor::new(&[2, 2, 3, 1]));
        let mut score = score(&cell, TargetConfig::default(), &*db);
        let provider = batch(&db, &[0], region_labels());
        score.process::<f64>(&mut cell, &provider, StimuliSet::Test).unwrap();

        assert_eq!(score.target().targets().as_slice(), &[0, 2, -1, 0]);
        assert_eq!(score.target().estimated_labels().as_slice(), &[0, 0, 0, 0]);
        assert_eq!(score.get_batch_success(), &[0.5]);
        let matrix = score.get_confusion_matrix(StimuliSet::Test);
        assert_eq!(matrix.get(0, 0), 2);
        assert_eq!(matrix.get(2, 0), 1);
        assert!(score.get_misclassified(StimuliSet::Test).is_empty());
    }

    #[test]
    fn weak_target_yields_to_any_other_class() {
        let db = database();
        let mut cell = FixedCell::new(Tensor::new(&[2, 2, 3, 1]));
        let config = TargetConfig { weak_target: Some(0), ..TargetConfig::default() };
        let mut target = target(&cell, config, &*db);
        let provider = batch(&db, &[0], region_labels());
        target.process::<f64>(&mut cell, &provider, StimuliSet::Test).unwrap();
        assert_eq!(target.targets().as_slice(), &[1, 2, -1, 2]);
        assert_eq!(target.state(), TargetState::LabelsEstimated);
    }

    #[test]
    fn binary_output_uses_the_threshold() {
        let db = database();
        let outputs = Tensor::from_vec(&[1, 1, 1, 3], vec![0.7, 0.2, 0.5]).unwrap();
        let mut cell = FixedCell::new(outputs);
        let mut score = score(&cell, TargetConfig::default(), &*db);
        assert_eq!(score.target().get_nb_targets(), 2);
        let provider = batch(&db, &[0, 1, 2], labels(&[1, 0, 1]));
        score.process::<f64>(&mut cell, &provider, StimuliSet::Test).unwrap();

        assert_eq!(score.target().estimated_labels().as_slice(), &[1, 0, 0]);
        let values = score.target().estimated_labels_value().as_slice();
        for (value, expected) in values.iter().zip(&[0.7, 0.8, 0.5]) {
            assert_relative_eq!(*value, *expected, epsilon = 1e-12);
        }
        assert_relative_eq!(score.get_batch_average_success(), 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn top_n_success() {
        let db = database();
        let outputs = Tensor::from_vec(&[1, 1, 4, 2], vec![0.1, 0.5, 0.3, 0.2,
                                                           0.4, 0.4, 0.1, 0.0]).unwrap();
        let mut cell = FixedCell::new(outputs);
        let config = TargetConfig { top_n: 2, ..TargetConfig::default() };
        let mut score = score(&cell, config, &*db);
        let provider = batch(&db, &[0, 1], labels(&[2, 1]));
        score.process::<f64>(&mut cell, &provider, StimuliSet::Test).unwrap();

        assert_eq!(score.target().estimated_labels().as_slice(), &[1, 2, 0, 1]);
        assert_eq!(score.get_batch_success(), &[0.0, 0.0]);
        assert_eq!(score.get_batch_top_n_success(), &[1.0, 1.0]);
        assert_eq!(score.get_average_top_n_success(StimuliSet::Test, 0), 1.0);
        assert!(score.new_validation_top_n_score(0.5));
    }

    #[test]
    fn top_n_larger_than_outputs_is_a_config_error() {
        let db = database();
        let mut cell = FixedCell::new(one_hot(2, &[0]));
        let config = TargetConfig { top_n: 3, ..TargetConfig::default() };
        let mut target = target(&cell, config, &*db);
        match target.process::<f64>(&mut cell, &batch(&db, &[0], labels(&[0])), StimuliSet::Test) {
            Err(Error::Config(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn target_out_of_range_is_an_invariant_error() {
        let db = database();
        let mut cell = FixedCell::new(one_hot(3, &[0]));
        let mut target = target(&cell, TargetConfig::default(), &*db);
        target.set_label_target(0, 5);
        match target.process::<f64>(&mut cell, &batch(&db, &[0], labels(&[0])), StimuliSet::Test) {
            Err(Error::Invariant(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn learn_set_writes_the_output_gradient() {
        let db = database();
        let outputs = Tensor::from_vec(&[1, 1, 2, 2], vec![0.2, 0.6, 0.9, 0.1]).unwrap();
        let mut cell = FixedCell::new(outputs);
        let mut target = target(&cell, TargetConfig::default(), &*db);
        target.process::<f64>(&mut cell, &batch(&db, &[0, 1], labels(&[1, 0])), StimuliSet::Learn).unwrap();

        let diff = cell.diff_inputs().read().read(&Backend::Native).unwrap();
        for (d, expected) in diff.iter().zip(&[-0.2, 0.4, 0.1, -0.1]) {
            assert_relative_eq!(*d, *expected, epsilon = 1e-12);
        }
        assert!(cell.diff_inputs().read().is_valid());
        assert_eq!(target.loss().len(), 1);
        assert_relative_eq!(target.loss()[0], 0.055, epsilon = 1e-12);

        target.process::<f64>(&mut cell, &batch(&db, &[0, 1], labels(&[1, 0])), StimuliSet::Test).unwrap();
        assert_eq!(target.loss().len(), 1);
        target.clear(StimuliSet::Learn);
        assert!(target.loss().is_empty());
    }

    #[test]
    fn scoring_needs_estimated_labels() {
        let db = database();
        let mut cell = FixedCell::new(one_hot(3, &[0]));
        let mut score = score(&cell, TargetConfig::default(), &*db);
        match score.compute_score(StimuliSet::Test) {
            Err(Error::Invariant(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        score.process::<f64>(&mut cell, &batch(&db, &[0], labels(&[0])), StimuliSet::Test).unwrap();
        assert!(score.compute_score(StimuliSet::Test).is_err());
    }

    #[test]
    fn validation_scores_track_the_best() {
        let db = database();
        let cell = FixedCell::new(one_hot(3, &[0]));
        let mut score = score(&cell, TargetConfig::default(), &*db);
        assert!(score.new_validation_score(0.5));
        assert!(!score.new_validation_score(0.4));
        assert!(score.new_validation_score(0.6));
        assert_eq!(score.get_max_validation_score(), 0.6);
        assert_eq!(score.get_validation_scores(), &[(0, 0.5), (0, 0.4), (0, 0.6)]);
        assert!(!score.new_validation_top_n_score(0.9));
    }

    #[test]
    fn clearing_scores() {
        let db = database();
        let mut cell = FixedCell::new(one_hot(3, &[0, 1, 0]));
        let mut score = score(&cell, TargetConfig::default(), &*db);
        score.process::<f64>(&mut cell, &batch(&db, &[0, 1, 2], labels(&[0, 1, 2])), StimuliSet::Test).unwrap();
        assert_relative_eq!(score.get_average_score(StimuliSet::Test, ConfusionTableMetric::Sensitivity),
                            2.0 / 3.0, epsilon = 1e-12);

        score.clear(StimuliSet::Test);
        assert!(score.get_confusion_matrix(StimuliSet::Test).is_empty());
        assert!(score.get_misclassified(StimuliSet::Test).is_empty());
        assert_eq!(score.get_score(StimuliSet::Test).success.len(), 1);
        assert_eq!(score.get_average_score(StimuliSet::Test, ConfusionTableMetric::Sensitivity), 0.0);

        score.clear_score(StimuliSet::Test);
        assert_eq!(score.get_average_success(StimuliSet::Test, 0), 0.0);
    }

    #[test]
    fn logs() {
        let dir = tempfile::tempdir().unwrap();
        let db = database();
        let mut cell = FixedCell::new(one_hot(3, &[0, 1, 0]));
        let mut score = score(&cell, TargetConfig::default(), &*db);
        score.process::<f64>(&mut cell, &batch(&db, &[0, 1, 2], labels(&[0, 1, 2])), StimuliSet::Test).unwrap();
        score.new_validation_score(0.25);

        let misclassified = dir.path().join("misclassified.dat");
        score.log_misclassified(&misclassified, StimuliSet::Test, &*db).unwrap();
        assert_eq!(fs::read_to_string(&misclassified).unwrap(), "# name target estimated\n2 \"s2\" bird cat\n");

        let validation = dir.path().join("validation.dat");
        score.log_success(&validation, StimuliSet::Validation, 0).unwrap();
        assert_eq!(fs::read_to_string(&validation).unwrap(), "0 0.25\n");

        let matrix = dir.path().join("confusion.dat");
        score.log_confusion_matrix(&matrix, StimuliSet::Test, &*db).unwrap();
        let text = fs::read_to_string(&matrix).unwrap();
        assert!(text.starts_with("target\\estimated cat dog bird\ncat 1 0 0\n"));
        assert!(text.contains("accuracy 2/3 = 66.67%"));

        let mapping = dir.path().join("mapping.dat");
        score.target().log_labels_mapping(&mapping, &*db).unwrap();
        assert_eq!(fs::read_to_string(&mapping).unwrap(),
                   "label name output\n0 cat 0\n1 dog 1\n2 bird 2\n3 fish 3\n");
    }
}
