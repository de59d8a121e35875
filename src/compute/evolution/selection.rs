//! Parent selection strategies.

use rand::prelude::*;

use crate::schema::{ConfigError, SelectionMethod};

/// An evaluated individual as seen by selection.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionCandidate {
    /// Identifies the individual within its population.
    pub id: u64,
    /// Lower is better (conventionally MSE).
    pub fitness: f64,
    pub complexity: usize,
}

impl SelectionCandidate {
    pub fn new(id: u64, fitness: f64, complexity: usize) -> Self {
        Self {
            id,
            fitness,
            complexity,
        }
    }
}

/// Selection failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("Cannot select from an empty population")]
    EmptyPopulation,
}

/// Chooses parents from an evaluated population.
pub trait SelectionStrategy: Send {
    /// Indices into `population` of `count` selected individuals.
    fn select_indices(
        &mut self,
        population: &[SelectionCandidate],
        count: usize,
    ) -> Result<Vec<usize>, SelectionError>;

    /// `count` selected individuals (with repetition).
    fn select(
        &mut self,
        population: &[SelectionCandidate],
        count: usize,
    ) -> Result<Vec<SelectionCandidate>, SelectionError> {
        Ok(self
            .select_indices(population, count)?
            .into_iter()
            .map(|i| population[i].clone())
            .collect())
    }
}

/// Build the strategy described by `method`, seeded with `seed`.
pub fn selection_from_config(
    method: &SelectionMethod,
    seed: u64,
) -> Result<Box<dyn SelectionStrategy>, ConfigError> {
    Ok(match *method {
        SelectionMethod::DoubleTournament {
            parsimony_size,
            fitness_size,
        } => Box::new(DoubleTournament::new(parsimony_size, fitness_size, seed)?),
        SelectionMethod::Tournament { size } => Box::new(Tournament::new(size, seed)?),
    })
}

/// `NaN` fitness ranks last.
#[inline]
fn fitness_key(fitness: f64) -> f64 {
    if fitness.is_nan() { f64::INFINITY } else { fitness }
}

/// Index of the winner among `size` uniform draws (with replacement) from
/// `pool`, keeping the first drawn on ties.
fn tournament<R: Rng>(
    rng: &mut R,
    pool: &[usize],
    size: usize,
    mut better: impl FnMut(usize, usize) -> bool,
) -> usize {
    let mut best = pool[rng.gen_range(0..pool.len())];
    for _ in 1..size {
        let contestant = pool[rng.gen_range(0..pool.len())];
        if better(contestant, best) {
            best = contestant;
        }
    }
    best
}

/// Double tournament: `fitness_size` parsimony tournaments (lowest
/// complexity wins) build a shortlist, then one fitness tournament over the
/// shortlist picks the parent.
#[derive(Debug)]
pub struct DoubleTournament {
    parsimony_size: usize,
    fitness_size: usize,
    rng: StdRng,
}

impl DoubleTournament {
    pub const DEFAULT_SIZE: usize = 7;

    pub fn new(parsimony_size: usize, fitness_size: usize, seed: u64) -> Result<Self, ConfigError> {
        if parsimony_size == 0 || fitness_size == 0 {
            return Err(ConfigError::InvalidTournamentSize);
        }
        Ok(Self {
            parsimony_size,
            fitness_size,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn parsimony_size(&self) -> usize {
        self.parsimony_size
    }

    pub fn fitness_size(&self) -> usize {
        self.fitness_size
    }

    fn select_one(
        &mut self,
        population: &[SelectionCandidate],
        all: &[usize],
        shortlist: &mut Vec<usize>,
    ) -> usize {
        shortlist.clear();
        for _ in 0..self.fitness_size {
            let winner = tournament(&mut self.rng, all, self.parsimony_size, |a, b| {
                population[a].complexity < population[b].complexity
            });
            shortlist.push(winner);
        }
        tournament(&mut self.rng, shortlist, self.fitness_size, |a, b| {
            fitness_key(population[a].fitness) < fitness_key(population[b].fitness)
        })
    }
}

impl SelectionStrategy for DoubleTournament {
    fn select_indices(
        &mut self,
        population: &[SelectionCandidate],
        count: usize,
    ) -> Result<Vec<usize>, SelectionError> {
        if population.is_empty() {
            return Err(SelectionError::EmptyPopulation);
        }
        let all: Vec<usize> = (0..population.len()).collect();
        let mut shortlist = Vec::with_capacity(self.fitness_size);
        Ok((0..count)
            .map(|_| self.select_one(population, &all, &mut shortlist))
            .collect())
    }
}

/// Plain fitness tournament with no parsimony pressure.
#[derive(Debug)]
pub struct Tournament {
    size: usize,
    rng: StdRng,
}

impl Tournament {
    pub fn new(size: usize, seed: u64) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::InvalidTournamentSize);
        }
        Ok(Self {
            size,
            rng: StdRng::seed_from_u64(seed),
        })
    }
}

impl SelectionStrategy for Tournament {
    fn select_indices(
        &mut self,
        population: &[SelectionCandidate],
        count: usize,
    ) -> Result<Vec<usize>, SelectionError> {
        if population.is_empty() {
            return Err(SelectionError::EmptyPopulation);
        }
        let all: Vec<usize> = (0..population.len()).collect();
        Ok((0..count)
            .map(|_| {
                tournament(&mut self.rng, &all, self.size, |a, b| {
                    fitness_key(population[a].fitness) < fitness_key(population[b].fitness)
                })
            })
            .collect())
    }
}
