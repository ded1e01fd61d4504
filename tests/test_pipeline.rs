mod common;

use common::*;
use labelscan::pipeline::ModelStatus;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_all_stages_publish_for_one_image() -> anyhow::Result<()> {
    let pipeline = fake_pipeline(ColorClassifier::new());

    let image_id = pipeline.submit(solid_image(120, 120, LABEL_RED));
    let result = within(pipeline.settled(image_id))
        .await?
        .ok_or_else(|| anyhow::anyhow!("image was replaced"))?;

    assert_eq!(result.image_id, Some(image_id));
    assert!(result.initialization_error.is_none());

    let detections = result.detections.expect("detections published");
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].class_name(), "nutrition_label");
    assert!((detections[0].min_distance_from_edges() - 0.3).abs() < 1e-5);
    assert!((detections[0].area_covered() - 0.12).abs() < 1e-5);

    let classification = result.classification.expect("classification published");
    assert_eq!(classification.label, "nutrition");
    assert!((classification.confidence - 0.93).abs() < 1e-5);

    let text = result.text_recognition.expect("text published");
    assert!(text.has(KeyFact::Title));
    assert!(text.has(KeyFact::Serving));
    assert!(text.has(KeyFact::Calories));
    assert!(text.has(KeyFact::Sugar));
    assert!(!text.has(KeyFact::Sodium));
    assert_eq!(text.found_count(), 4);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stale_result_is_discarded() -> anyhow::Result<()> {
    let (classifier, mut gate) = ColorClassifier::gated(LABEL_RED);
    let pipeline = fake_pipeline(classifier);
    let mut events = pipeline.events();

    let first = pipeline.submit(solid_image(64, 64, LABEL_RED));
    within(gate.started.recv()).await?;

    let second = pipeline.submit(solid_image(64, 64, PLAIN_BLUE));
    let settled = within(pipeline.settled(second))
        .await?
        .ok_or_else(|| anyhow::anyhow!("second image was replaced"))?;
    assert_eq!(settled.classification.map(|c| c.label).as_deref(), Some("other"));

    // Let the first image's classifier finish late
    gate.release.send(())?;
    wait_for_event(&mut events, |event| {
        *event
            == PipelineEvent::Discarded {
                image_id: first,
                stage: Stage::Classifier,
            }
    })
    .await?;

    let current = pipeline.snapshot();
    assert_eq!(current.image_id, Some(second));
    let classification = current.classification.expect("second classification kept");
    assert_eq!(classification.label, "other");

    assert!(pipeline.settled(first).await.is_none());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_new_submission_clears_slots() -> anyhow::Result<()> {
    let (classifier, mut gate) = ColorClassifier::gated(PLAIN_BLUE);
    let pipeline = fake_pipeline(classifier);

    let first = pipeline.submit(solid_image(64, 64, LABEL_RED));
    let settled = within(pipeline.settled(first)).await?;
    assert!(settled.is_some_and(|r| r.classification.is_some()));

    let second = pipeline.submit(solid_image(64, 64, PLAIN_BLUE));
    within(gate.started.recv()).await?;

    let mut results = pipeline.subscribe();
    let current = within(results.wait_for(|r| r.image_id == Some(second)))
        .await??
        .clone();
    assert!(current.classification.is_none());
    assert!(current.pending.contains(&Stage::Classifier));

    gate.release.send(())?;
    let settled = within(pipeline.settled(second))
        .await?
        .ok_or_else(|| anyhow::anyhow!("second image was replaced"))?;
    assert_eq!(settled.classification.map(|c| c.label).as_deref(), Some("other"));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stage_failure_leaves_siblings_alone() -> anyhow::Result<()> {
    let pipeline = LabelPipeline::builder(test_config())
        .detector(|| Ok(FailingDetector))
        .classifier(|| Ok(ColorClassifier::new()))
        .text_recognizer(|| Ok(FixedRecognizer::lines(&["sodium 5mg"])))
        .build();
    let mut events = pipeline.events();

    let image_id = pipeline.submit(solid_image(80, 40, LABEL_RED));
    let result = within(pipeline.settled(image_id))
        .await?
        .ok_or_else(|| anyhow::anyhow!("image was replaced"))?;

    assert!(result.detections.is_none());
    assert!(result.classification.is_some());
    assert!(result.text_recognition.is_some_and(|t| t.has(KeyFact::Sodium)));
    assert!(result.initialization_error.is_none());

    let failed = wait_for_event(&mut events, |event| {
        matches!(event, PipelineEvent::Failed { stage: Stage::Detector, .. })
    })
    .await?;
    if let PipelineEvent::Failed { reason, image_id: failed_id, .. } = failed {
        assert_eq!(failed_id, image_id);
        assert!(reason.contains("detector exploded"));
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_model_load_failure_is_recorded() -> anyhow::Result<()> {
    let pipeline = LabelPipeline::builder(test_config())
        .detector(|| Ok(FixedDetector::single_label()))
        .classifier(|| -> anyhow::Result<ColorClassifier> { anyhow::bail!("weights missing") })
        .text_recognizer(|| Ok(FixedRecognizer::lines(&["protein"])))
        .build();

    within(pipeline.wait_for_models()).await?;
    assert_eq!(pipeline.model_status(Stage::Detector), ModelStatus::Ready);
    assert!(matches!(
        pipeline.model_status(Stage::Classifier),
        ModelStatus::Unavailable(reason) if reason.contains("weights missing")
    ));

    let image_id = pipeline.submit(solid_image(50, 100, LABEL_RED));
    let result = within(pipeline.settled(image_id))
        .await?
        .ok_or_else(|| anyhow::anyhow!("image was replaced"))?;

    assert!(result.classification.is_none());
    assert!(result.detections.is_some_and(|d| d.len() == 1));
    assert!(result.text_recognition.is_some_and(|t| t.has(KeyFact::Protein)));

    let error = result.initialization_error.expect("load failure recorded");
    assert!(error.contains("classifier"));
    assert!(error.contains("weights missing"));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_first_initialization_error_is_kept() -> anyhow::Result<()> {
    let pipeline = LabelPipeline::builder(test_config())
        .detector(|| -> anyhow::Result<FixedDetector> { anyhow::bail!("detector weights missing") })
        .classifier(|| -> anyhow::Result<ColorClassifier> {
            std::thread::sleep(std::time::Duration::from_millis(200));
            anyhow::bail!("classifier weights missing")
        })
        .build();

    within(pipeline.wait_for_models()).await?;
    let mut results = pipeline.subscribe();
    let state = within(results.wait_for(|r| r.initialization_error.is_some()))
        .await??
        .clone();

    let error = state.initialization_error.unwrap_or_default();
    assert!(error.contains("detector weights missing"));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unconfigured_stages_settle_empty() -> anyhow::Result<()> {
    let pipeline = LabelPipeline::builder(test_config())
        .text_recognizer(|| Ok(FixedRecognizer::lines(&["Valeur nutritive", "Lipides 3 g"])))
        .build();

    assert!(matches!(
        pipeline.model_status(Stage::Detector),
        ModelStatus::Unavailable(_)
    ));

    let image_id = pipeline.submit(solid_image(30, 30, PLAIN_BLUE));
    let result = within(pipeline.settled(image_id))
        .await?
        .ok_or_else(|| anyhow::anyhow!("image was replaced"))?;

    assert!(result.detections.is_none());
    assert!(result.classification.is_none());
    assert!(result.initialization_error.is_none());

    let text = result.text_recognition.expect("text published");
    assert!(text.has(KeyFact::Title));
    assert!(text.has(KeyFact::Fat));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_result_serializes_to_json() -> anyhow::Result<()> {
    let pipeline = fake_pipeline(ColorClassifier::new());

    let image_id = pipeline.submit(solid_image(100, 50, LABEL_RED));
    let result = within(pipeline.settled(image_id))
        .await?
        .ok_or_else(|| anyhow::anyhow!("image was replaced"))?;

    let json: serde_json::Value = serde_json::to_value(&result)?;
    assert_eq!(json["image_id"], serde_json::json!(image_id.uuid().to_string()));
    assert_eq!(json["classification"]["label"], "nutrition");
    assert_eq!(json["text_recognition"]["contains_key_facts"]["title"], true);
    assert_eq!(json["detections"].as_array().map(Vec::len), Some(1));

    Ok(())
}
