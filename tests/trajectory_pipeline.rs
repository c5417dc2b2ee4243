//! End-to-end pipeline test: train, checkpoint, reload, sample.
//!
//! This test validates the complete flow on a tiny synthetic corpus:
//! 1. Train a small model for one epoch
//! 2. Reload it from the final checkpoint
//! 3. Sample a trajectory to a file
//! 4. Verify the output format line by line

use std::fs;
use std::io::Write;
use std::path::Path;

use candle_core::Device;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

use pose_mdn_rs::config::PoseMdnConfig;
use pose_mdn_rs::data::format_pose;
use pose_mdn_rs::sampler::{sample_to_file, TrajectorySampler, SEED_POSE};
use pose_mdn_rs::trainer::{load_checkpoint, Trainer};

/// Write a small 6-dimensional corpus shaped like the real data: three
/// position channels plus three slowly drifting rate channels.
fn write_corpus(path: &Path, lines: usize) {
    let mut file = fs::File::create(path).unwrap();
    for i in 0..lines {
        let t = i as f64 * 0.1;
        let pose = [
            t.sin() * 0.2,
            t.cos() * 0.2,
            (t * 0.5).sin() * 0.1,
            2.0 + t.sin() * 0.01,
            16.0 + t.cos() * 0.01,
            -18000.0 - i as f64 * 0.5,
        ];
        writeln!(file, "{}", format_pose(&pose)).unwrap();
    }
}

fn trained_checkpoint(dir: &Path) -> std::path::PathBuf {
    let corpus = dir.join("train.txt");
    write_corpus(&corpus, 40);

    let mut config = PoseMdnConfig::test();
    config.dataset.path = corpus.to_string_lossy().into_owned();
    config.output_dir = dir.join("outputs").to_string_lossy().into_owned();

    let mut trainer = Trainer::new(config).unwrap();
    let summary = trainer.train().unwrap();
    assert!(summary.steps > 0);
    assert!(summary.final_loss.unwrap().is_finite());

    dir.join("outputs").join("checkpoint-final")
}

#[test]
fn test_train_then_sample_writes_formatted_trajectory() {
    let dir = tempdir().unwrap();
    let checkpoint = trained_checkpoint(dir.path());

    let (model, config) = load_checkpoint(&checkpoint, &Device::Cpu).unwrap();
    assert_eq!(model.dim(), 6);

    let output = dir.path().join("output.txt");
    let rng = ChaCha8Rng::seed_from_u64(config.seed);
    let written = sample_to_file(&model, 5, rng, &output).unwrap();
    assert_eq!(written, 6);

    let contents = fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0], format_pose(&SEED_POSE));

    for line in &lines {
        let fields: Vec<&str> = line.split(' ').collect();
        assert_eq!(fields.len(), 6, "line `{line}`");
        for field in fields {
            // Fixed-point formatting: six digits after the decimal point.
            let (_, fraction) = field.split_once('.').expect("no decimal point");
            assert_eq!(fraction.len(), 6, "field `{field}`");
            field.parse::<f64>().unwrap();
        }
    }
}

#[test]
fn test_zero_step_sample_is_seed_only() {
    let dir = tempdir().unwrap();
    let checkpoint = trained_checkpoint(dir.path());
    let (model, _) = load_checkpoint(&checkpoint, &Device::Cpu).unwrap();

    let output = dir.path().join("output.txt");
    let rng = ChaCha8Rng::seed_from_u64(0);
    let written = sample_to_file(&model, 0, rng, &output).unwrap();
    assert_eq!(written, 1);

    let contents = fs::read_to_string(&output).unwrap();
    assert_eq!(contents, format!("{}\n", format_pose(&SEED_POSE)));
}

#[test]
fn test_sampling_is_reproducible_across_runs() {
    let dir = tempdir().unwrap();
    let checkpoint = trained_checkpoint(dir.path());
    let (model, _) = load_checkpoint(&checkpoint, &Device::Cpu).unwrap();

    let run = |seed: u64| -> Vec<Vec<f64>> {
        TrajectorySampler::new(&model, 8, ChaCha8Rng::seed_from_u64(seed))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    };

    assert_eq!(run(42), run(42));
    assert_ne!(run(42), run(43));
}

#[test]
fn test_checkpoint_reload_preserves_predictions() {
    let dir = tempdir().unwrap();
    let checkpoint = trained_checkpoint(dir.path());

    let (model_a, _) = load_checkpoint(&checkpoint, &Device::Cpu).unwrap();
    let (model_b, _) = load_checkpoint(&checkpoint, &Device::Cpu).unwrap();

    let sample = |model: &pose_mdn_rs::PoseMdn| -> Vec<Vec<f64>> {
        TrajectorySampler::new(model, 4, ChaCha8Rng::seed_from_u64(11))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    };

    assert_eq!(sample(&model_a), sample(&model_b));
}
