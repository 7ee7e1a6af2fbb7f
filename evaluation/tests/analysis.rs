use evaluation::{
    DETAILED_RESULTS_FILE, DISTRIBUTIONS_FILE, EvalErr, PREDICTION_ANALYSIS_FILE, REPORT_FILE,
    analyze_model_performance, compare_models,
};

#[test]
fn analysis_writes_every_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("analysis_results");

    let y_true = [98., 105., 121., 87., 110., 93., 132., 101.];
    let y_pred = [101., 103., 115., 92., 108., 99., 120., 100.];

    let report = analyze_model_performance(&y_true, &y_pred, &out).unwrap();
    assert_eq!(report.n_samples, 8);

    for file in [
        PREDICTION_ANALYSIS_FILE,
        DISTRIBUTIONS_FILE,
        REPORT_FILE,
        DETAILED_RESULTS_FILE,
    ] {
        assert!(out.join(file).is_file(), "{file} is missing");
    }

    let text = std::fs::read_to_string(out.join(REPORT_FILE)).unwrap();
    assert_eq!(text, report.render());

    let rows = std::fs::read_to_string(out.join(DETAILED_RESULTS_FILE)).unwrap();
    assert_eq!(rows.lines().count(), 9);
}

#[test]
fn models_are_compared_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let plot = dir.path().join("comparison.png");

    let y_true = [100., 110., 120.];
    let good = [101., 109., 121.];
    let bad = [90., 125., 100.];

    let scored = compare_models(
        &[("good", &y_true[..], &good[..]), ("bad", &y_true[..], &bad[..])],
        Some(&plot),
    )
    .unwrap();

    assert_eq!(scored[0].0, "good");
    assert_eq!(scored[1].0, "bad");
    assert!(scored[0].1.mae < scored[1].1.mae);
    assert!(scored[0].1.r2 > scored[1].1.r2);
    assert!(plot.is_file());
}

#[test]
fn mismatched_predictions_fail() {
    let dir = tempfile::tempdir().unwrap();
    let err = analyze_model_performance(&[1., 2.], &[1.], dir.path()).unwrap_err();
    assert!(matches!(err, EvalErr::LengthMismatch { .. }));
}
