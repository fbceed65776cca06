//! Whole-run behaviour against the scripted browser backend.

use image::{Rgba, RgbaImage};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use visreg::capture::{ManualClock, MockLauncher, MockPage, Orchestrator, RunError};
use visreg::manifest::{RunManifest, SkipReason};
use visreg::matrix::{CaptureJob, Resolution, jobs};
use visreg::store::ArtifactStore;

const WHITE: [u8; 4] = [255, 255, 255, 255];
const RED: [u8; 4] = [255, 0, 0, 255];

fn setup() -> (tempfile::TempDir, ArtifactStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    store.ensure_dirs().unwrap();
    (dir, store)
}

fn write_baseline(store: &ArtifactStore, job: &CaptureJob, color: [u8; 4]) {
    let name = job.artifact_name().unwrap();
    RgbaImage::from_pixel(job.resolution.width, job.resolution.height, Rgba(color))
        .save(store.baseline_path(&name))
        .unwrap();
}

fn orchestrator(launcher: &MockLauncher, clock: &Arc<ManualClock>) -> Orchestrator {
    Orchestrator::new(launcher.clone()).clock(clock.clone())
}

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_navigation_is_attempted_exactly_three_times() {
    let (_dir, store) = setup();
    let url = "https://down.example.com/";
    let job = CaptureJob::new(url, Resolution::new(20, 10));
    write_baseline(&store, &job, WHITE);

    let launcher = MockLauncher::new().page(url, MockPage::default().statuses([Some(503)]));
    let clock = Arc::new(ManualClock::new());

    let manifest = orchestrator(&launcher, &clock)
        .run_compare(&[job.clone()], &store)
        .unwrap();

    assert_eq!(launcher.navigations(url), 3);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(5), Duration::from_secs(5)]);
    assert!(manifest.results.is_empty());
    assert_eq!(manifest.skipped.len(), 1);
    assert_eq!(manifest.skipped[0].reason, SkipReason::NavigationFailure);
    assert_eq!(manifest.skipped[0].job, job);
    assert_eq!(launcher.launches_and_closes(), (1, 1));

    let saved = std::fs::read_to_string(store.manifest_path()).unwrap();
    assert_eq!(saved.trim(), "[]");
}

#[test]
fn test_one_broken_job_does_not_stop_the_run() {
    let (_dir, store) = setup();
    let list = urls(&["https://a.com/", "https://b.com/", "https://c.com/"]);
    let all = jobs(&list, &[Resolution::new(16, 12)]);
    for job in &all {
        write_baseline(&store, job, WHITE);
    }

    let launcher = MockLauncher::new()
        .page("https://a.com/", MockPage::titled("A"))
        .page("https://b.com/", MockPage::titled("B").failing_hide())
        .page("https://c.com/", MockPage::titled("C"));
    let clock = Arc::new(ManualClock::new());

    let manifest = orchestrator(&launcher, &clock).run_compare(&all, &store).unwrap();

    let titles: Vec<&str> = manifest.results.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["A", "C"]);
    assert_eq!(manifest.skipped.len(), 1);
    assert_eq!(manifest.skipped[0].reason, SkipReason::CaptureFailure);
    assert_eq!(launcher.launches_and_closes(), (3, 3));
    assert_eq!(RunManifest::load(&store.manifest_path()).unwrap().results, manifest.results);
}

#[test]
fn test_screenshot_failure_releases_session() {
    let (_dir, store) = setup();
    let job = CaptureJob::new("https://a.com/", Resolution::new(8, 8));
    write_baseline(&store, &job, WHITE);

    let launcher = MockLauncher::new().page("https://a.com/", MockPage::default().failing_screenshot());
    let clock = Arc::new(ManualClock::new());
    let manifest = orchestrator(&launcher, &clock).run_compare(&[job], &store).unwrap();

    assert_eq!(manifest.skipped[0].reason, SkipReason::CaptureFailure);
    assert_eq!(launcher.launches_and_closes(), (1, 1));
    assert_eq!(std::fs::read_dir(&store.candidate_dir).unwrap().count(), 0);
}

#[test]
fn test_missing_baseline_is_skipped_without_launching() {
    let (_dir, store) = setup();
    let with_baseline = CaptureJob::new("https://a.com/", Resolution::new(8, 8));
    let without = CaptureJob::new("https://a.com/new", Resolution::new(8, 8));
    write_baseline(&store, &with_baseline, WHITE);

    let launcher = MockLauncher::new();
    let clock = Arc::new(ManualClock::new());
    let manifest = orchestrator(&launcher, &clock)
        .run_compare(&[without.clone(), with_baseline], &store)
        .unwrap();

    assert_eq!(manifest.results.len(), 1);
    assert_eq!(manifest.skipped.len(), 1);
    assert_eq!(manifest.skipped[0].reason, SkipReason::MissingBaseline);
    assert_eq!(manifest.skipped[0].job, without);
    assert_eq!(launcher.launches_and_closes(), (1, 1));
}

#[test]
fn test_manifest_follows_job_order() {
    let (_dir, store) = setup();
    let list = urls(&["https://b.com/", "https://a.com/"]);
    let resolutions = [Resolution::new(12, 6), Resolution::new(6, 12)];
    let all = jobs(&list, &resolutions);
    for job in &all {
        write_baseline(&store, job, WHITE);
    }

    let launcher = MockLauncher::new();
    let clock = Arc::new(ManualClock::new());
    let manifest = orchestrator(&launcher, &clock).run_compare(&all, &store).unwrap();

    let order: Vec<(String, String)> = manifest
        .results
        .iter()
        .map(|r| (r.url.clone(), r.resolution.clone()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("https://b.com/".to_string(), "12x6".to_string()),
            ("https://b.com/".to_string(), "6x12".to_string()),
            ("https://a.com/".to_string(), "12x6".to_string()),
            ("https://a.com/".to_string(), "6x12".to_string()),
        ]
    );
    assert!(manifest.results.iter().all(|r| r.differences == 0));
}

#[test]
fn test_changed_page_produces_diff_artifacts() {
    let (_dir, store) = setup();
    let job = CaptureJob::new("https://a.com/pricing", Resolution::new(10, 10));
    write_baseline(&store, &job, WHITE);

    let launcher = MockLauncher::new().page("https://a.com/pricing", MockPage::titled("Pricing").color(RED));
    let clock = Arc::new(ManualClock::new());
    let manifest = orchestrator(&launcher, &clock).run_compare(&[job], &store).unwrap();

    let result = &manifest.results[0];
    assert_eq!(result.differences, 100);
    assert_eq!(result.base_screenshot, "a-com-pricing-10x10.png");
    assert_eq!(result.new_screenshot, "new-a-com-pricing-10x10.png");
    assert_eq!(result.diff_screenshot, "diff-a-com-pricing-10x10.png");
    assert!(store.candidate_dir.join(&result.new_screenshot).is_file());

    let diff = image::open(store.diff_dir.join(&result.diff_screenshot)).unwrap().to_rgba8();
    assert_eq!(diff.dimensions(), (10, 10));
    assert_eq!(diff.get_pixel(3, 3), &Rgba([255, 0, 0, 255]));
}

#[test]
fn test_taller_candidate_counts_padding_rows() {
    let (_dir, store) = setup();
    let job = CaptureJob::new("https://a.com/", Resolution::new(10, 10));
    write_baseline(&store, &job, RED);

    // padding is transparent and blends to white, so only a colored page shows it
    let launcher =
        MockLauncher::new().page("https://a.com/", MockPage::default().color(RED).page_height(12));
    let clock = Arc::new(ManualClock::new());
    let manifest = orchestrator(&launcher, &clock).run_compare(&[job], &store).unwrap();

    assert_eq!(manifest.results[0].differences, 20);
    let diff = image::open(store.diff_dir.join(&manifest.results[0].diff_screenshot)).unwrap();
    assert_eq!((diff.width(), diff.height()), (10, 12));
}

#[test]
fn test_launch_failure_aborts_and_keeps_manifest() {
    let (_dir, store) = setup();
    let job = CaptureJob::new("https://a.com/", Resolution::new(4, 4));
    write_baseline(&store, &job, WHITE);

    let launcher = MockLauncher::new().failing_launch();
    let clock = Arc::new(ManualClock::new());
    let err = orchestrator(&launcher, &clock).run_compare(&[job.clone()], &store).unwrap_err();

    match err {
        RunError::Launch { job: failed, source } => {
            assert_eq!(failed, job);
            assert!(source.is_run_fatal());
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(store.manifest_path().is_file());
    assert!(store.run_info_path().is_file());
}

#[test]
fn test_candidates_are_cleared_before_run() {
    let (_dir, store) = setup();
    std::fs::write(store.candidate_dir.join("new-stale-1x1.png"), b"old").unwrap();

    let launcher = MockLauncher::new();
    let clock = Arc::new(ManualClock::new());
    orchestrator(&launcher, &clock).run_compare(&[], &store).unwrap();

    assert!(!store.candidate_dir.join("new-stale-1x1.png").exists());
    assert_eq!(std::fs::read_to_string(store.manifest_path()).unwrap().trim(), "[]");
}

#[test]
fn test_record_then_compare_is_clean() {
    let (_dir, store) = setup();
    let all = jobs(&urls(&["https://a.com/", "https://b.com/x"]), &[Resolution::new(9, 7)]);

    let launcher = MockLauncher::new().page("https://b.com/x", MockPage::titled("X").color(RED));
    let clock = Arc::new(ManualClock::new());
    let recorder = orchestrator(&launcher, &clock);

    let summary = recorder.run_record(&all, &store).unwrap();
    assert_eq!(summary.recorded, vec!["a-com--9x7.png".to_string(), "b-com-x-9x7.png".to_string()]);
    assert!(summary.skipped.is_empty());
    assert_eq!(
        store.baseline_stems().unwrap().into_iter().collect::<Vec<_>>(),
        vec!["a-com-".to_string(), "b-com-x".to_string()]
    );

    let manifest = recorder.run_compare(&all, &store).unwrap();
    assert_eq!(manifest.results.len(), 2);
    assert_eq!(manifest.changed().count(), 0);
}

#[test]
fn test_record_skips_unreachable_pages() {
    let (_dir, store) = setup();
    let all = jobs(&urls(&["https://a.com/", "https://gone.com/"]), &[Resolution::new(5, 5)]);

    let launcher = MockLauncher::new().page("https://gone.com/", MockPage::default().statuses([None]));
    let clock = Arc::new(ManualClock::new());
    let summary = orchestrator(&launcher, &clock).run_record(&all, &store).unwrap();

    assert_eq!(summary.recorded, vec!["a-com--5x5.png".to_string()]);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].reason, SkipReason::NavigationFailure);
    assert!(!store.has_baseline("gone-com--5x5.png"));
}

#[test]
fn test_failed_recording_keeps_existing_baseline() {
    let (_dir, store) = setup();
    let job = CaptureJob::new("https://a.com/", Resolution::new(6, 6));
    write_baseline(&store, &job, WHITE);

    let launcher =
        MockLauncher::new().page("https://a.com/", MockPage::default().color(RED).failing_title());
    let clock = Arc::new(ManualClock::new());
    let summary = orchestrator(&launcher, &clock).run_record(&[job.clone()], &store).unwrap();

    assert!(summary.recorded.is_empty());
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].reason, SkipReason::CaptureFailure);
    let name = job.artifact_name().unwrap();
    let baseline = image::open(store.baseline_path(&name)).unwrap().to_rgba8();
    assert_eq!(baseline.get_pixel(0, 0), &Rgba(WHITE));
    assert_eq!(std::fs::read_dir(&store.baseline_dir).unwrap().count(), 1);
}

#[test]
fn test_failed_capture_leaves_no_candidate() {
    let (_dir, store) = setup();
    let job = CaptureJob::new("https://a.com/", Resolution::new(6, 6));
    write_baseline(&store, &job, WHITE);

    let launcher = MockLauncher::new().page("https://a.com/", MockPage::default().failing_title());
    let clock = Arc::new(ManualClock::new());
    let manifest = orchestrator(&launcher, &clock).run_compare(&[job], &store).unwrap();

    assert_eq!(manifest.skipped[0].reason, SkipReason::CaptureFailure);
    assert_eq!(std::fs::read_dir(&store.candidate_dir).unwrap().count(), 0);
}
