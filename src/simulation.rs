use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::ChaChaGenerator;
use crate::Forest;
use crate::ForestError;
use crate::Model;
use crate::RandomGenerator;
use crate::SegmentObserver;

/// Simulate the genealogies along one locus, handing each local tree
/// to `observer`.
///
/// The forest is cleared first, so it can be reused between loci.
/// Returns the number of segments.
pub fn simulate_locus<R, O>(forest: &mut Forest<R>, observer: &mut O) -> Result<usize, ForestError>
where
    R: RandomGenerator,
    O: SegmentObserver + ?Sized,
{
    forest.clear();
    forest.build_initial_tree()?;
    observer.observe(&forest.local_tree());
    let mut segments = 1;
    while forest.next_base() < forest.model().loci_length() {
        forest.sample_next_genealogy()?;
        observer.observe(&forest.local_tree());
        segments += 1;
    }
    tracing::debug!(segments, nodes = forest.nodes().len(), "locus simulated");
    Ok(segments)
}

/// Run `replicates` independent simulations of `model` in parallel.
///
/// Every replicate gets its own forest and a generator seeded from a
/// master generator, so the results only depend on `seed`.
/// They are returned in replicate order; the first error ends the run.
pub fn run_replicates<T, F>(
    model: &Model,
    seed: u64,
    replicates: usize,
    f: F,
) -> Result<Vec<T>, ForestError>
where
    T: Send,
    F: Fn(&mut Forest) -> Result<T, ForestError> + Sync,
{
    let mut master = ChaCha8Rng::seed_from_u64(seed);
    let seeds = (0..replicates).map(|_| master.gen::<u64>()).collect::<Vec<_>>();
    seeds
        .into_par_iter()
        .map(|seed| {
            let mut forest = Forest::new(model.clone(), ChaChaGenerator::seed_from_u64(seed));
            f(&mut forest)
        })
        .collect()
}

#[cfg(test)]
mod test_simulation {
    use super::*;
    use crate::ForestOptions;
    use crate::ModelBuilder;
    use crate::TreeSummary;

    fn checked_forest(model: Model, seed: u64) -> Forest {
        Forest::with_options(
            model,
            ChaChaGenerator::seed_from_u64(seed),
            ForestOptions::all_checks(),
        )
    }

    fn mean_and_standard_error(values: &[f64]) -> (f64, f64) {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        (mean, (variance / n).sqrt())
    }

    #[test]
    fn test_expected_tree_shape_without_recombination() {
        let model = ModelBuilder::new(5).build().unwrap();
        let results = run_replicates(&model, 42, 10_000, |forest| {
            forest.build_initial_tree()?;
            let tree = forest.local_tree();
            Ok((tree.scaled_tmrca(), tree.scaled_length()))
        })
        .unwrap();
        let tmrca = results.iter().map(|r| r.0).collect::<Vec<_>>();
        let length = results.iter().map(|r| r.1).collect::<Vec<_>>();

        // In units of 4N generations: 1 - 1/n and the sum of 1/i for i < n.
        let (mean, se) = mean_and_standard_error(&tmrca);
        assert!((mean - 0.8).abs() < 4.0 * se, "tmrca {mean} +- {se}");
        let (mean, se) = mean_and_standard_error(&length);
        let expected = 1.0 + 1.0 / 2.0 + 1.0 / 3.0 + 1.0 / 4.0;
        assert!((mean - expected).abs() < 4.0 * se, "length {mean} +- {se}");
    }

    #[test]
    fn test_replicates_are_deterministic() {
        let model = ModelBuilder::new(6).recombination(1e-8, 1e4).build().unwrap();
        let run = |seed| {
            run_replicates(&model, seed, 50, |forest| {
                let mut summary = TreeSummary::new();
                simulate_locus(forest, &mut summary)?;
                Ok(summary.segments().to_vec())
            })
            .unwrap()
        };
        let first = run(7);
        assert_eq!(first.len(), 50);
        assert_eq!(first, run(7));
        assert_ne!(first, run(8));
    }

    #[test]
    fn test_segments_cover_the_locus() {
        let model = ModelBuilder::new(10)
            .recombination(2e-8, 1e5)
            .recombination_rate_change(4e4, 5e-9)
            .build()
            .unwrap();
        let mut forest = checked_forest(model, 11);
        let mut summary = TreeSummary::new();
        let segments = simulate_locus(&mut forest, &mut summary).unwrap();
        assert_eq!(segments, summary.len());
        assert!(segments > 1);
        assert_eq!(summary.segments()[0].start, 0.0);
        assert_eq!(summary.segments()[segments - 1].end, 1e5);
        for pair in summary.segments().windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert!(summary.segments().iter().any(|s| s.end == 4e4));
    }

    #[test]
    fn test_forest_is_reusable() {
        let model = ModelBuilder::new(4).recombination(1e-8, 1e4).build().unwrap();
        let mut forest = checked_forest(model, 3);
        let mut summary = TreeSummary::new();
        simulate_locus(&mut forest, &mut summary).unwrap();
        let first = summary.segments().to_vec();

        summary.clear();
        forest.set_random_generator(ChaChaGenerator::seed_from_u64(3));
        simulate_locus(&mut forest, &mut summary).unwrap();
        assert_eq!(first, summary.segments());
    }

    #[test]
    fn test_unreachable_window_does_not_change_genealogies() {
        let builder = ModelBuilder::new(8).recombination(2e-8, 5e4);
        let exact = builder.clone().build().unwrap();
        let windowed = builder.window_length_seq(1e6).build().unwrap();

        let mut a = TreeSummary::new();
        simulate_locus(&mut checked_forest(exact, 5), &mut a).unwrap();
        let mut b = TreeSummary::new();
        simulate_locus(&mut checked_forest(windowed, 5), &mut b).unwrap();
        assert_eq!(a.segments(), b.segments());
    }

    #[test]
    fn test_pruning_keeps_genealogies_valid() {
        for model in [
            ModelBuilder::new(8)
                .recombination(5e-8, 5e4)
                .window_length_seq(0.0)
                .build()
                .unwrap(),
            ModelBuilder::new(8)
                .recombination(5e-8, 5e4)
                .window_length_rec(2)
                .build()
                .unwrap(),
        ] {
            let mut forest = checked_forest(model, 17);
            let mut summary = TreeSummary::new();
            let segments = simulate_locus(&mut forest, &mut summary).unwrap();
            assert!(segments > 1);
            assert_eq!(summary.sequence_length(), 5e4);
            forest.prune();
            forest.check_tree();
        }
    }

    #[test]
    fn test_pruning_shrinks_the_forest() {
        let builder = ModelBuilder::new(10).recombination(5e-8, 1e5);
        let exact = builder.clone().build().unwrap();
        let windowed = builder.window_length_rec(0).build().unwrap();

        let mut a = checked_forest(exact, 23);
        simulate_locus(&mut a, &mut TreeSummary::new()).unwrap();
        let mut b = checked_forest(windowed, 23);
        simulate_locus(&mut b, &mut TreeSummary::new()).unwrap();
        b.prune();
        assert!(b.nodes().len() < a.nodes().len());
    }

    #[test]
    fn test_large_sample_uses_set_store() {
        let model = ModelBuilder::new(800).recombination(2e-9, 2e4).build().unwrap();
        let mut forest = checked_forest(model, 29);
        assert!(forest.contemporaries().uses_set());
        let mut summary = TreeSummary::new();
        let segments = simulate_locus(&mut forest, &mut summary).unwrap();
        assert!(segments > 1);
        assert_eq!(summary.sequence_length(), 2e4);
        assert_eq!(forest.local_tree().samples().count(), 800);
    }

    #[test]
    fn test_structured_population() {
        let model = ModelBuilder::default()
            .populations(2)
            .samples(0, 4, 0.0)
            .samples(1, 4, 0.0)
            .symmetric_migration(0.0, 2.5e-5)
            .recombination(1e-8, 2e4)
            .build()
            .unwrap();
        for seed in 0..5 {
            let mut forest = checked_forest(model.clone(), seed);
            let mut summary = TreeSummary::new();
            simulate_locus(&mut forest, &mut summary).unwrap();
            assert!(summary.segments().iter().all(|s| s.tmrca.is_finite()));
        }
    }

    #[test]
    fn test_growth_shortens_trees() {
        let constant = ModelBuilder::new(5).build().unwrap();
        let growing = ModelBuilder::new(5).growth_rate(0.0, 0, 1e-3).build().unwrap();
        let mean_tmrca = |model: &Model| {
            let tmrca = run_replicates(model, 1, 2000, |forest| {
                forest.build_initial_tree()?;
                Ok(forest.get_tmrca())
            })
            .unwrap();
            tmrca.iter().sum::<f64>() / tmrca.len() as f64
        };
        assert!(mean_tmrca(&growing) < 0.5 * mean_tmrca(&constant));
    }

    #[test]
    fn test_ancient_samples_with_pulse() {
        let model = ModelBuilder::default()
            .populations(2)
            .samples(0, 3, 0.0)
            .samples(1, 3, 500.0)
            .single_migration(1000.0, 1, 0, 1.0)
            .recombination(1e-8, 1e4)
            .build()
            .unwrap();
        for seed in 0..5 {
            let mut forest = checked_forest(model.clone(), seed);
            let mut summary = TreeSummary::new();
            simulate_locus(&mut forest, &mut summary).unwrap();
            assert!(summary.segments().iter().all(|s| s.tmrca >= 500.0));
        }
    }

    #[test]
    fn test_model_errors_propagate() {
        fn run(samples: usize) -> Result<usize, ForestError> {
            let model = ModelBuilder::new(samples).recombination(1e-8, 1e3).build()?;
            let mut forest = Forest::new(model, ChaChaGenerator::seed_from_u64(1));
            simulate_locus(&mut forest, &mut TreeSummary::new())
        }
        assert!(run(3).unwrap() >= 1);
        let error = run(1).unwrap_err();
        assert!(matches!(
            error,
            ForestError::Model(crate::ModelError::SampleSizeTooSmall(1))
        ));
    }

    #[test]
    fn test_error_ends_replicates() {
        let model = ModelBuilder::default()
            .populations(3)
            .samples(0, 2, 0.0)
            .population_size(0.0, 0, 1e12)
            .single_migration(0.5, 0, 1, 1.0)
            .single_migration(0.5, 1, 2, 1.0)
            .single_migration(0.5, 2, 0, 1.0)
            .build()
            .unwrap();
        let result = run_replicates(&model, 1, 4, |forest| forest.build_initial_tree());
        assert!(matches!(result, Err(ForestError::CircularMigration { .. })));
    }
}
