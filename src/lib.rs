//! A constraint-satisfaction solver that fills a crossword grid with words from a dictionary.
//! Slots are modeled as variables whose domains are candidate words; we prune the domains with
//! node and arc consistency (AC-3) and then run a backtracking search guided by the usual CSP
//! ordering heuristics (minimum remaining values, degree, least-constraining value).

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use std::mem;

use bit_set::BitSet;
use instant::{Duration, Instant};
use log::debug;
use smallvec::SmallVec;
use thiserror::Error;

/// The expected maximum length for a single slot.
pub const MAX_SLOT_LENGTH: usize = 21;

/// The minimum run of fillable cells that counts as a slot. Shorter runs are just loose cells.
pub const MIN_SLOT_LENGTH: usize = 2;

/// Direction that a slot is facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Across,
    Down,
}

/// A slot in the grid, identified by its start cell, direction, and length. Two variables are
/// the same slot iff all four fields match. Variables are the keys of the domain mapping and of
/// the assignment, and never change after the grid is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Variable {
    pub row: usize,
    pub col: usize,
    pub direction: Direction,
    pub length: usize,
}

impl Variable {
    /// Generate the coords for each cell of this slot, in word order.
    pub fn cells(&self) -> SmallVec<[(usize, usize); MAX_SLOT_LENGTH]> {
        (0..self.length)
            .map(|cell_idx| match self.direction {
                Direction::Across => (self.row, self.col + cell_idx),
                Direction::Down => (self.row + cell_idx, self.col),
            })
            .collect()
    }

    /// Rank used as the last resort when breaking heuristic ties, so that variable selection is
    /// reproducible: lowest row, then column, then across before down.
    fn tie_break_rank(&self) -> (usize, usize, u8) {
        let direction_rank = match self.direction {
            Direction::Across => 0,
            Direction::Down => 1,
        };
        (self.row, self.col, direction_rank)
    }
}

/// An error produced while parsing a structure template into a `Grid`.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("structure template contains no rows")]
    EmptyTemplate,
    #[error("row {row} is {found} cells wide, expected {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("unexpected character {0:?} in structure template")]
    UnexpectedChar(char),
}

/// The static description of a puzzle: grid geometry, the set of slot variables, and the overlap
/// table recording, for every pair of crossing variables, the local character offsets at which
/// they must agree. Built once from a template and never mutated afterwards.
pub struct Grid {
    width: usize,
    height: usize,

    /// Occupancy mask over `row * width + col`: a set bit means the cell is fillable.
    cells: BitSet,

    variables: Vec<Variable>,

    /// Offsets `(offset_in_x, offset_in_y)` for every *ordered* pair of crossing variables.
    /// Pairs that don't cross have no entry. Symmetric by construction: if `(x, y)` maps to
    /// `(ox, oy)` then `(y, x)` maps to `(oy, ox)`.
    overlaps: HashMap<(Variable, Variable), (usize, usize)>,

    neighbors_by_variable: HashMap<Variable, Vec<Variable>>,
}

impl Grid {
    /// Parse a grid from a string template, with `.` representing fillable cells and `#`
    /// representing blocks. Surrounding blank lines and per-line whitespace are ignored, but
    /// every remaining row must have the same width.
    pub fn from_template(template: &str) -> Result<Grid, GridError> {
        let rows: Vec<&str> = template
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        if rows.is_empty() {
            return Err(GridError::EmptyTemplate);
        }

        let height = rows.len();
        let width = rows[0].chars().count();

        let mut cells = BitSet::with_capacity(width * height);
        for (row_idx, row) in rows.iter().enumerate() {
            let row_width = row.chars().count();
            if row_width != width {
                return Err(GridError::RaggedRow {
                    row: row_idx,
                    found: row_width,
                    expected: width,
                });
            }

            for (col_idx, cell) in row.chars().enumerate() {
                match cell {
                    '.' => {
                        cells.insert(row_idx * width + col_idx);
                    }
                    '#' => {}
                    other => return Err(GridError::UnexpectedChar(other)),
                }
            }
        }

        Ok(Grid::build(width, height, cells))
    }

    /// Derive the variable set and overlap table from an occupancy mask.
    fn build(width: usize, height: usize, cells: BitSet) -> Grid {
        let mut variables: Vec<Variable> = vec![];

        // Across slots are maximal horizontal runs of fillable cells; a run only counts once it
        // spans at least `MIN_SLOT_LENGTH` cells.
        for row in 0..height {
            let mut run_start: Option<usize> = None;

            for col in 0..=width {
                let fillable = col < width && cells.contains(row * width + col);

                if fillable {
                    run_start.get_or_insert(col);
                } else if let Some(start) = run_start.take() {
                    let length = col - start;
                    if length >= MIN_SLOT_LENGTH {
                        variables.push(Variable {
                            row,
                            col: start,
                            direction: Direction::Across,
                            length,
                        });
                    }
                }
            }
        }

        // Down slots, same scan with the axes swapped.
        for col in 0..width {
            let mut run_start: Option<usize> = None;

            for row in 0..=height {
                let fillable = row < height && cells.contains(row * width + col);

                if fillable {
                    run_start.get_or_insert(row);
                } else if let Some(start) = run_start.take() {
                    let length = row - start;
                    if length >= MIN_SLOT_LENGTH {
                        variables.push(Variable {
                            row: start,
                            col,
                            direction: Direction::Down,
                            length,
                        });
                    }
                }
            }
        }

        // Build a map from cell location to the variables covering it, which we can then use to
        // calculate overlaps. Runs are maximal, so a cell is covered by at most one variable per
        // direction.
        let mut entries_by_cell: HashMap<(usize, usize), SmallVec<[(usize, usize); 2]>> =
            HashMap::new();

        for (var_idx, variable) in variables.iter().enumerate() {
            for (cell_idx, cell) in variable.cells().into_iter().enumerate() {
                entries_by_cell.entry(cell).or_default().push((var_idx, cell_idx));
            }
        }

        let mut overlaps: HashMap<(Variable, Variable), (usize, usize)> = HashMap::new();
        let mut neighbors_by_variable: HashMap<Variable, Vec<Variable>> = HashMap::new();

        for entries in entries_by_cell.values() {
            if let &[(x_idx, x_offset), (y_idx, y_offset)] = &entries[..] {
                let x = variables[x_idx];
                let y = variables[y_idx];

                overlaps.insert((x, y), (x_offset, y_offset));
                overlaps.insert((y, x), (y_offset, x_offset));
                neighbors_by_variable.entry(x).or_default().push(y);
                neighbors_by_variable.entry(y).or_default().push(x);
            }
        }

        Grid {
            width,
            height,
            cells,
            variables,
            overlaps,
            neighbors_by_variable,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_fillable(&self, row: usize, col: usize) -> bool {
        self.cells.contains(row * self.width + col)
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// The character offsets at which `x` and `y` must agree, or `None` if they don't cross.
    pub fn overlap(&self, x: &Variable, y: &Variable) -> Option<(usize, usize)> {
        self.overlaps.get(&(*x, *y)).copied()
    }

    /// Every variable crossing `x`.
    pub fn neighbors(&self, x: &Variable) -> &[Variable] {
        self.neighbors_by_variable.get(x).map_or(&[], Vec::as_slice)
    }

    /// Every ordered pair of crossing variables.
    pub fn arcs(&self) -> impl Iterator<Item = (Variable, Variable)> + '_ {
        self.overlaps.keys().copied()
    }
}

/// A partial mapping from slot variable to chosen word. Complete when it covers every variable
/// in the grid.
pub type Assignment = HashMap<Variable, String>;

/// A struct tracking statistics about the solving process.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub states: u64,
    pub backtracks: u64,
    pub duration: Duration,
}

/// The character of `word` at char index `idx`.
fn char_at(word: &str, idx: usize) -> Option<char> {
    word.chars().nth(idx)
}

/// The solver owns the domain store: a mapping from each slot variable to its current candidate
/// word set. Domains only ever shrink -- node consistency and AC-3 prune them irreversibly
/// before search, and the backtracking search itself treats them as read-only, copying the
/// assignment (not the domains) on each branch.
pub struct Solver<'a> {
    grid: &'a Grid,
    domains: HashMap<Variable, HashSet<String>>,
    statistics: Statistics,
}

impl<'a> Solver<'a> {
    /// Create a solver whose initial domain for every variable is the full word list.
    pub fn new(grid: &'a Grid, word_list: &[String]) -> Solver<'a> {
        let full_domain: HashSet<String> = word_list.iter().cloned().collect();

        let domains = grid
            .variables()
            .iter()
            .map(|&variable| (variable, full_domain.clone()))
            .collect();

        Solver {
            grid,
            domains,
            statistics: Statistics {
                states: 0,
                backtracks: 0,
                duration: Duration::from_millis(0),
            },
        }
    }

    /// The current candidate set for a variable.
    pub fn domain(&self, variable: &Variable) -> Option<&HashSet<String>> {
        self.domains.get(variable)
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Enforce node and arc consistency, and then run the backtracking search. Returns the
    /// first complete consistent assignment found, or `None` if the puzzle has no solution.
    pub fn solve(&mut self) -> Option<Assignment> {
        let start = Instant::now();

        self.enforce_node_consistency();
        debug!(
            "{} candidate words across {} slots after node consistency",
            self.domains.values().map(HashSet::len).sum::<usize>(),
            self.domains.len(),
        );

        // An AC-3 wipeout already proves there is no solution; search never starts.
        let result = if self.ac3(None) {
            self.backtrack(&Assignment::new())
        } else {
            None
        };

        self.statistics.duration = start.elapsed();
        result
    }

    /// Remove from every domain the candidates whose length doesn't match the slot. A domain
    /// may legitimately end up empty here; AC-3 will report the wipeout.
    pub fn enforce_node_consistency(&mut self) {
        for (variable, words) in &mut self.domains {
            words.retain(|word| word.chars().count() == variable.length);
        }
    }

    /// Make `x` arc-consistent with `y` by removing from `x`'s domain every word with no
    /// supporting word in `y`'s *current* domain at the overlap offsets. Returns whether
    /// anything was removed. A pair with no overlap entry needs no revision.
    pub fn revise(&mut self, x: &Variable, y: &Variable) -> bool {
        let Some((x_offset, y_offset)) = self.grid.overlap(x, y) else {
            return false;
        };

        // Take `x`'s domain out of the map so we can filter it against `y`'s.
        let Some(x_entry) = self.domains.get_mut(x) else {
            return false;
        };
        let mut x_words = mem::take(x_entry);
        let y_words = &self.domains[y];

        let initial_count = x_words.len();
        x_words.retain(|x_word| {
            let shared = char_at(x_word, x_offset);
            y_words.iter().any(|y_word| char_at(y_word, y_offset) == shared)
        });
        let revised = x_words.len() < initial_count;

        if let Some(x_entry) = self.domains.get_mut(x) {
            *x_entry = x_words;
        }
        revised
    }

    /// Run the AC-3 propagation loop over the given worklist of ordered arcs, or over every
    /// ordered pair of crossing variables if `arcs` is `None`. Returns false if some domain is
    /// emptied, meaning the whole puzzle is unsolvable; true once the fixed point is reached.
    pub fn ac3(&mut self, arcs: Option<Vec<(Variable, Variable)>>) -> bool {
        let mut queue: VecDeque<(Variable, Variable)> = match arcs {
            Some(arcs) => arcs.into(),
            None => self.grid.arcs().collect(),
        };

        while let Some((x, y)) = queue.pop_front() {
            if self.revise(&x, &y) {
                if self.domains[&x].is_empty() {
                    debug!("arc consistency wiped out the domain of {:?}", x);
                    return false;
                }

                // `x` shrank, so arcs into `x` may have lost support and need rechecking.
                for &z in self.grid.neighbors(&x) {
                    if z != y {
                        queue.push_back((z, x));
                    }
                }
            }
        }

        true
    }

    /// Check a partial assignment against all constraints: assigned words fit their slots,
    /// crossing words agree on their shared letter, and no word is used twice. Variables absent
    /// from the assignment impose no constraint. This runs on every candidate placement, so it
    /// only looks at what's assigned.
    pub fn consistent(&self, assignment: &Assignment) -> bool {
        let mut seen_words: HashSet<&str> = HashSet::with_capacity(assignment.len());

        for (variable, word) in assignment {
            if word.chars().count() != variable.length {
                return false;
            }

            // The same word can't appear in two slots.
            if !seen_words.insert(word.as_str()) {
                return false;
            }

            for neighbor in self.grid.neighbors(variable) {
                let Some(other_word) = assignment.get(neighbor) else {
                    continue;
                };

                if let Some((offset, other_offset)) = self.grid.overlap(variable, neighbor) {
                    if char_at(word, offset) != char_at(other_word, other_offset) {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Choose the next slot to fill: fewest remaining candidates first (minimum remaining
    /// values), then most crossings with other unassigned slots (degree), then the documented
    /// positional rank so that selection is deterministic. Returns `None` once every variable
    /// is assigned.
    fn select_unassigned_variable(&self, assignment: &Assignment) -> Option<Variable> {
        self.grid
            .variables()
            .iter()
            .copied()
            .filter(|variable| !assignment.contains_key(variable))
            .min_by_key(|variable| {
                let degree = self
                    .grid
                    .neighbors(variable)
                    .iter()
                    .filter(|neighbor| !assignment.contains_key(*neighbor))
                    .count();

                (
                    self.domains[variable].len(),
                    Reverse(degree),
                    variable.tie_break_rank(),
                )
            })
    }

    /// Order the candidate words for a slot by how many options they would rule out across the
    /// neighboring slots' domains, counting both overlap-letter mismatches and identical-word
    /// conflicts (least-constraining value first). Equal counts fall back to lexicographic
    /// order, so the result is deterministic.
    fn order_domain_values(&self, variable: &Variable) -> Vec<String> {
        let mut values: Vec<String> = self.domains[variable].iter().cloned().collect();
        values.sort_unstable();

        values.sort_by_cached_key(|word| {
            let mut ruled_out: usize = 0;

            for neighbor in self.grid.neighbors(variable) {
                let Some((offset, neighbor_offset)) = self.grid.overlap(variable, neighbor)
                else {
                    continue;
                };
                let shared = char_at(word, offset);

                for neighbor_word in &self.domains[neighbor] {
                    if char_at(neighbor_word, neighbor_offset) != shared {
                        ruled_out += 1;
                    }
                    if neighbor_word == word {
                        ruled_out += 1;
                    }
                }
            }

            ruled_out
        });

        values
    }

    /// Depth-first search over partial assignments. Each tentative extension is validated with
    /// `consistent` before recursing, so a complete assignment needs no final re-check; the
    /// first one found propagates straight up. A branch where every candidate fails just
    /// reports `None` and the caller moves on to its own next candidate.
    fn backtrack(&mut self, assignment: &Assignment) -> Option<Assignment> {
        let Some(variable) = self.select_unassigned_variable(assignment) else {
            return Some(assignment.clone());
        };

        self.statistics.states += 1;

        for word in self.order_domain_values(&variable) {
            let mut extended = assignment.clone();
            extended.insert(variable, word);

            if self.consistent(&extended) {
                if let Some(solution) = self.backtrack(&extended) {
                    return Some(solution);
                }
            }
        }

        self.statistics.backtracks += 1;
        None
    }
}

/// Turn a (possibly partial) assignment into a 2D array of optional letters, writing each
/// word's characters along its slot's direction. This is the interface the rendering layer
/// consumes.
pub fn letter_grid(grid: &Grid, assignment: &Assignment) -> Vec<Vec<Option<char>>> {
    let mut letters: Vec<Vec<Option<char>>> = vec![vec![None; grid.width()]; grid.height()];

    for (variable, word) in assignment {
        for ((row, col), letter) in variable.cells().into_iter().zip(word.chars()) {
            letters[row][col] = Some(letter);
        }
    }

    letters
}

/// Turn the given grid and assignment into a rendered string, with `#` for blocked cells and a
/// space for fillable cells no variable covers.
pub fn render_grid(grid: &Grid, assignment: &Assignment) -> String {
    let letters = letter_grid(grid, assignment);

    let rendered_rows: Vec<String> = (0..grid.height())
        .map(|row| {
            (0..grid.width())
                .map(|col| {
                    if grid.is_fillable(row, col) {
                        letters[row][col].unwrap_or(' ')
                    } else {
                        '#'
                    }
                })
                .collect()
        })
        .collect();

    rendered_rows.join("\n")
}
