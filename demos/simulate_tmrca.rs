use smc_genealogy::run_replicates;
use smc_genealogy::simulate_locus;
use smc_genealogy::ForestError;
use smc_genealogy::ModelBuilder;
use smc_genealogy::TreeSummary;

// Mean TMRCA and tree length along a 1Mb locus, in units of 4N generations.
fn main() -> Result<(), ForestError> {
    let seed = std::env::args()
        .nth(1)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(42);
    let model = ModelBuilder::new(20)
        .recombination(1e-8, 1e6)
        .window_length_seq(1e5)
        .build()?;

    let summaries = run_replicates(&model, seed, 100, |forest| {
        let mut summary = TreeSummary::scaled();
        simulate_locus(forest, &mut summary)?;
        Ok(summary)
    })?;

    let mut tmrca = 0.0;
    let mut length = 0.0;
    let mut segments = 0;
    for summary in &summaries {
        tmrca += summary.mean_tmrca().unwrap_or(0.0);
        length += summary.mean_length().unwrap_or(0.0);
        segments += summary.len();
    }
    let n = summaries.len() as f64;
    println!("replicates: {}", summaries.len());
    println!("segments per locus: {:.1}", segments as f64 / n);
    println!("mean tmrca: {:.4} (expected {:.4})", tmrca / n, 1.0 - 1.0 / 20.0);
    println!(
        "mean tree length: {:.4} (expected {:.4})",
        length / n,
        (1..20).map(|i| 1.0 / i as f64).sum::<f64>()
    );
    Ok(())
}
