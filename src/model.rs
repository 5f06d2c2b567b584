use thiserror::Error;

/// Invalid model parameters.
#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("sample size must be at least 2, got {0}")]
    SampleSizeTooSmall(usize),
    #[error("the model needs at least one population")]
    NoPopulations,
    #[error("population {population} does not exist, the model has {count} populations")]
    UnknownPopulation { population: usize, count: usize },
    #[error("invalid time {0}")]
    InvalidTime(f64),
    #[error("population size must be positive, got {0}")]
    InvalidPopulationSize(f64),
    #[error("invalid rate {0}")]
    InvalidRate(f64),
    #[error("single migration from population {source_pop} to {sink} needs a probability in [0, 1], got {probability}")]
    InvalidSingleMigration {
        source_pop: usize,
        sink: usize,
        probability: f64,
    },
    #[error("a lineage can't migrate from population {0} into itself")]
    SelfMigration(usize),
    #[error("the model has {0} populations but no migration between them")]
    DisconnectedPopulations(usize),
    #[error("sequence length must be positive, got {0}")]
    InvalidSequenceLength(f64),
    #[error("recombination rate change at {position} is outside of the sequence [0, {loci_length})")]
    InvalidRateChange { position: f64, loci_length: f64 },
    #[error("window length must not be negative, got {0}")]
    InvalidWindowLength(f64),
}

#[derive(Debug, Clone, PartialEq)]
struct Epoch {
    start: f64,
    pop_sizes: Vec<f64>,
    growth_rates: Vec<f64>,
    // [source][sink], backwards in time.
    migration_rates: Vec<Vec<f64>>,
    total_migration_rates: Vec<f64>,
    single_migrations: Option<Vec<Vec<f64>>>,
}

/// The demographic and recombination model of a simulation.
///
/// Times are in generations, rates per generation (and per base for
/// recombination), population sizes are diploid.
/// Besides the parameters, the model carries two cursors that the
/// forest advances while it simulates: the current epoch and the
/// current recombination-rate segment of the sequence.
#[derive(Debug, Clone)]
pub struct Model {
    sample_times: Vec<f64>,
    sample_populations: Vec<usize>,
    population_number: usize,
    default_pop_size: f64,
    epochs: Vec<Epoch>,
    current_epoch: usize,
    loci_length: f64,
    sequence_positions: Vec<f64>,
    recombination_rates: Vec<f64>,
    current_segment: usize,
    window_length_seq: Option<f64>,
    window_length_rec: Option<usize>,
}

impl Model {
    pub fn sample_size(&self) -> usize {
        self.sample_times.len()
    }

    pub fn sample_time(&self, sample: usize) -> f64 {
        self.sample_times[sample]
    }

    pub fn sample_population(&self, sample: usize) -> usize {
        self.sample_populations[sample]
    }

    pub fn population_number(&self) -> usize {
        self.population_number
    }

    pub fn default_pop_size(&self) -> f64 {
        self.default_pop_size
    }

    /// Express a time in units of `4 * N0` generations.
    pub fn scale_time(&self, time: f64) -> f64 {
        time / (4.0 * self.default_pop_size)
    }

    fn epoch(&self) -> &Epoch {
        &self.epochs[self.current_epoch]
    }

    /// Diploid size of `population` at `time`, which must lie in the current epoch.
    pub fn population_size(&self, population: usize, time: f64) -> f64 {
        let epoch = self.epoch();
        let growth = epoch.growth_rates[population];
        let size = epoch.pop_sizes[population];
        if growth == 0.0 {
            size
        } else {
            size * (-(time - epoch.start) * growth).exp()
        }
    }

    /// Pairwise coalescence rate `1 / (2N)` of `population` at `time`.
    pub fn inv_double_pop_size(&self, population: usize, time: f64) -> f64 {
        1.0 / (2.0 * self.population_size(population, time))
    }

    pub fn growth_rate(&self, population: usize) -> f64 {
        self.epoch().growth_rates[population]
    }

    /// Rate at which a lineage in `source` moves to `sink`, backwards in time.
    pub fn migration_rate(&self, source: usize, sink: usize) -> f64 {
        self.epoch().migration_rates[source][sink]
    }

    pub fn total_migration_rate(&self, population: usize) -> f64 {
        self.epoch().total_migration_rates[population]
    }

    /// Probability that a lineage in `source` moves to `sink` in the
    /// pulse migration at the start of the current epoch.
    pub fn single_mig_pop(&self, source: usize, sink: usize) -> f64 {
        match &self.epoch().single_migrations {
            Some(probabilities) => probabilities[source][sink],
            None => 0.0,
        }
    }

    pub fn has_fixed_time_event(&self, time: f64) -> bool {
        let epoch = self.epoch();
        epoch.single_migrations.is_some() && epoch.start == time
    }

    pub fn current_time(&self) -> f64 {
        self.epoch().start
    }

    /// Start of the next epoch, or infinity in the last one.
    pub fn next_time(&self) -> f64 {
        match self.epochs.get(self.current_epoch + 1) {
            Some(epoch) => epoch.start,
            None => f64::INFINITY,
        }
    }

    pub fn reset_time(&mut self) {
        self.current_epoch = 0;
    }

    /// # Panics
    ///
    /// * If the current epoch is the last one.
    pub fn increase_time(&mut self) {
        assert!(
            self.current_epoch + 1 < self.epochs.len(),
            "no epoch after time {}",
            self.current_time()
        );
        self.current_epoch += 1;
    }

    pub fn loci_length(&self) -> f64 {
        self.loci_length
    }

    /// Recombination rate per base and generation at the current sequence position.
    pub fn recombination_rate(&self) -> f64 {
        self.recombination_rates[self.current_segment]
    }

    pub fn recombination_rate_at(&self, segment: usize) -> f64 {
        self.recombination_rates[segment]
    }

    /// Start of the sequence segment `segment`.
    pub fn change_position(&self, segment: usize) -> f64 {
        self.sequence_positions[segment]
    }

    pub fn sequence_segment(&self) -> usize {
        self.current_segment
    }

    pub fn current_sequence_position(&self) -> f64 {
        self.sequence_positions[self.current_segment]
    }

    /// Start of the next rate segment, or the sequence end.
    pub fn next_sequence_position(&self) -> f64 {
        match self.sequence_positions.get(self.current_segment + 1) {
            Some(&position) => position,
            None => self.loci_length,
        }
    }

    pub fn reset_sequence_position(&mut self) {
        self.current_segment = 0;
    }

    /// # Panics
    ///
    /// * If the current segment is the last one.
    pub fn increase_sequence_position(&mut self) {
        assert!(self.current_segment + 1 < self.sequence_positions.len());
        self.current_segment += 1;
    }

    pub fn window_length_seq(&self) -> Option<f64> {
        self.window_length_seq
    }

    pub fn window_length_rec(&self) -> Option<usize> {
        self.window_length_rec
    }

    /// Pruning only happens when at least one window is set.
    pub fn has_approximation(&self) -> bool {
        self.window_length_seq.is_some() || self.window_length_rec.is_some()
    }

    /// `true` if migration during the current or a later epoch, or a
    /// pulse migration after the current time, can still move lineages
    /// between populations.
    pub fn has_migration_after_current_time(&self) -> bool {
        self.epochs[self.current_epoch..]
            .iter()
            .enumerate()
            .any(|(i, epoch)| {
                (i > 0 && epoch.single_migrations.is_some())
                    || epoch.total_migration_rates.iter().any(|&r| r > 0.0)
            })
    }
}

/// Collects model parameters and validates them in [`ModelBuilder::build`].
///
/// Population sizes default to `default_pop_size`, growth and
/// migration rates to zero. A size change resets the growth rate of
/// its population unless a growth rate is set at the same time.
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    samples: Vec<(usize, usize, f64)>,
    population_number: usize,
    default_pop_size: f64,
    pop_sizes: Vec<(f64, usize, f64)>,
    growth_rates: Vec<(f64, usize, f64)>,
    migration_rates: Vec<(f64, usize, usize, f64)>,
    single_migrations: Vec<(f64, usize, usize, f64)>,
    recombination_rate: f64,
    rate_changes: Vec<(f64, f64)>,
    loci_length: f64,
    window_length_seq: Option<f64>,
    window_length_rec: Option<usize>,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self {
            samples: vec![],
            population_number: 1,
            default_pop_size: 10000.0,
            pop_sizes: vec![],
            growth_rates: vec![],
            migration_rates: vec![],
            single_migrations: vec![],
            recombination_rate: 0.0,
            rate_changes: vec![],
            loci_length: 1.0,
            window_length_seq: None,
            window_length_rec: None,
        }
    }
}

impl ModelBuilder {
    /// `sample_size` samples taken at time 0 from population 0.
    pub fn new(sample_size: usize) -> Self {
        Self::default().samples(0, sample_size, 0.0)
    }

    pub fn populations(mut self, population_number: usize) -> Self {
        self.population_number = population_number;
        self
    }

    pub fn samples(mut self, population: usize, count: usize, time: f64) -> Self {
        self.samples.push((population, count, time));
        self
    }

    pub fn default_pop_size(mut self, size: f64) -> Self {
        self.default_pop_size = size;
        self
    }

    pub fn population_size(mut self, time: f64, population: usize, size: f64) -> Self {
        self.pop_sizes.push((time, population, size));
        self
    }

    pub fn growth_rate(mut self, time: f64, population: usize, rate: f64) -> Self {
        self.growth_rates.push((time, population, rate));
        self
    }

    pub fn migration_rate(mut self, time: f64, source: usize, sink: usize, rate: f64) -> Self {
        self.migration_rates.push((time, source, sink, rate));
        self
    }

    /// Set the rate between every ordered pair of populations.
    pub fn symmetric_migration(mut self, time: f64, rate: f64) -> Self {
        for source in 0..self.population_number {
            for sink in (0..self.population_number).filter(|&sink| sink != source) {
                self.migration_rates.push((time, source, sink, rate));
            }
        }
        self
    }

    /// Move each lineage of `source` to `sink` with `probability` at `time`.
    pub fn single_migration(mut self, time: f64, source: usize, sink: usize, probability: f64) -> Self {
        self.single_migrations.push((time, source, sink, probability));
        self
    }

    pub fn recombination(mut self, rate: f64, loci_length: f64) -> Self {
        self.recombination_rate = rate;
        self.loci_length = loci_length;
        self
    }

    pub fn recombination_rate_change(mut self, position: f64, rate: f64) -> Self {
        self.rate_changes.push((position, rate));
        self
    }

    pub fn window_length_seq(mut self, length: f64) -> Self {
        self.window_length_seq = Some(length);
        self
    }

    pub fn window_length_rec(mut self, recombinations: usize) -> Self {
        self.window_length_rec = Some(recombinations);
        self
    }

    fn check_population(&self, population: usize) -> Result<(), ModelError> {
        if population < self.population_number {
            Ok(())
        } else {
            Err(ModelError::UnknownPopulation {
                population,
                count: self.population_number,
            })
        }
    }

    fn check_time(time: f64) -> Result<(), ModelError> {
        if time.is_finite() && time >= 0.0 {
            Ok(())
        } else {
            Err(ModelError::InvalidTime(time))
        }
    }

    fn check_rate(rate: f64) -> Result<(), ModelError> {
        if rate.is_finite() && rate >= 0.0 {
            Ok(())
        } else {
            Err(ModelError::InvalidRate(rate))
        }
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.population_number == 0 {
            return Err(ModelError::NoPopulations);
        }
        let sample_size = self.samples.iter().map(|s| s.1).sum::<usize>();
        if sample_size < 2 {
            return Err(ModelError::SampleSizeTooSmall(sample_size));
        }
        for &(population, _, time) in &self.samples {
            self.check_population(population)?;
            Self::check_time(time)?;
        }
        if !(self.default_pop_size.is_finite() && self.default_pop_size > 0.0) {
            return Err(ModelError::InvalidPopulationSize(self.default_pop_size));
        }
        for &(time, population, size) in &self.pop_sizes {
            Self::check_time(time)?;
            self.check_population(population)?;
            if !(size.is_finite() && size > 0.0) {
                return Err(ModelError::InvalidPopulationSize(size));
            }
        }
        for &(time, population, rate) in &self.growth_rates {
            Self::check_time(time)?;
            self.check_population(population)?;
            if !rate.is_finite() {
                return Err(ModelError::InvalidRate(rate));
            }
        }
        for &(time, source, sink, rate) in &self.migration_rates {
            Self::check_time(time)?;
            self.check_population(source)?;
            self.check_population(sink)?;
            if source == sink {
                return Err(ModelError::SelfMigration(source));
            }
            Self::check_rate(rate)?;
        }
        for &(time, source, sink, probability) in &self.single_migrations {
            Self::check_time(time)?;
            self.check_population(source)?;
            self.check_population(sink)?;
            if source == sink {
                return Err(ModelError::SelfMigration(source));
            }
            if !(0.0..=1.0).contains(&probability) {
                return Err(ModelError::InvalidSingleMigration {
                    source_pop: source,
                    sink,
                    probability,
                });
            }
        }
        if !(self.loci_length.is_finite() && self.loci_length > 0.0) {
            return Err(ModelError::InvalidSequenceLength(self.loci_length));
        }
        Self::check_rate(self.recombination_rate)?;
        for &(position, rate) in &self.rate_changes {
            if !(0.0..self.loci_length).contains(&position) {
                return Err(ModelError::InvalidRateChange {
                    position,
                    loci_length: self.loci_length,
                });
            }
            Self::check_rate(rate)?;
        }
        if let Some(length) = self.window_length_seq {
            if !(length >= 0.0) {
                return Err(ModelError::InvalidWindowLength(length));
            }
        }
        if self.population_number > 1
            && self.migration_rates.iter().all(|m| m.3 == 0.0)
            && self.single_migrations.iter().all(|m| m.3 == 0.0)
        {
            return Err(ModelError::DisconnectedPopulations(self.population_number));
        }
        Ok(())
    }

    fn build_epochs(&self) -> Vec<Epoch> {
        let mut times = vec![0.0];
        times.extend(self.pop_sizes.iter().map(|c| c.0));
        times.extend(self.growth_rates.iter().map(|c| c.0));
        times.extend(self.migration_rates.iter().map(|c| c.0));
        times.extend(self.single_migrations.iter().map(|c| c.0));
        times.sort_by(|a, b| a.total_cmp(b));
        times.dedup();

        let npop = self.population_number;
        let mut epochs: Vec<Epoch> = Vec::with_capacity(times.len());
        for &start in &times {
            let mut epoch = match epochs.last() {
                Some(previous) => {
                    let elapsed = start - previous.start;
                    let pop_sizes = previous
                        .pop_sizes
                        .iter()
                        .zip(&previous.growth_rates)
                        .map(|(size, growth)| size * (-elapsed * growth).exp())
                        .collect();
                    Epoch {
                        start,
                        pop_sizes,
                        growth_rates: previous.growth_rates.clone(),
                        migration_rates: previous.migration_rates.clone(),
                        total_migration_rates: vec![],
                        single_migrations: None,
                    }
                }
                None => Epoch {
                    start,
                    pop_sizes: vec![self.default_pop_size; npop],
                    growth_rates: vec![0.0; npop],
                    migration_rates: vec![vec![0.0; npop]; npop],
                    total_migration_rates: vec![],
                    single_migrations: None,
                },
            };
            for &(_, population, size) in self.pop_sizes.iter().filter(|c| c.0 == start) {
                epoch.pop_sizes[population] = size;
                epoch.growth_rates[population] = 0.0;
            }
            for &(_, population, rate) in self.growth_rates.iter().filter(|c| c.0 == start) {
                epoch.growth_rates[population] = rate;
            }
            for &(_, source, sink, rate) in self.migration_rates.iter().filter(|c| c.0 == start) {
                epoch.migration_rates[source][sink] = rate;
            }
            for &(_, source, sink, probability) in
                self.single_migrations.iter().filter(|c| c.0 == start)
            {
                epoch
                    .single_migrations
                    .get_or_insert_with(|| vec![vec![0.0; npop]; npop])[source][sink] = probability;
            }
            epoch.total_migration_rates = epoch
                .migration_rates
                .iter()
                .map(|rates| rates.iter().sum())
                .collect();
            epochs.push(epoch);
        }
        epochs
    }

    pub fn build(self) -> Result<Model, ModelError> {
        self.validate()?;
        let epochs = self.build_epochs();

        let mut samples = self.samples.clone();
        samples.sort_by(|a, b| a.2.total_cmp(&b.2));
        let mut sample_times = vec![];
        let mut sample_populations = vec![];
        for (population, count, time) in samples {
            sample_times.extend(std::iter::repeat(time).take(count));
            sample_populations.extend(std::iter::repeat(population).take(count));
        }

        let mut rate_changes = self.rate_changes.clone();
        rate_changes.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut sequence_positions = vec![0.0];
        let mut recombination_rates = vec![self.recombination_rate];
        for (position, rate) in rate_changes {
            if position == 0.0 {
                recombination_rates[0] = rate;
            } else if sequence_positions.last() == Some(&position) {
                if let Some(last) = recombination_rates.last_mut() {
                    *last = rate;
                }
            } else {
                sequence_positions.push(position);
                recombination_rates.push(rate);
            }
        }

        Ok(Model {
            sample_times,
            sample_populations,
            population_number: self.population_number,
            default_pop_size: self.default_pop_size,
            epochs,
            current_epoch: 0,
            loci_length: self.loci_length,
            sequence_positions,
            recombination_rates,
            current_segment: 0,
            window_length_seq: self.window_length_seq,
            window_length_rec: self.window_length_rec,
        })
    }
}
