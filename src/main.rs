use std::env;
use std::fs;
use std::process;

use crossfill::{render_grid, Grid, Solver};

fn load_word_list(path: &str) -> Vec<String> {
    fs::read_to_string(path)
        .expect("Something went wrong reading the word list")
        .lines()
        .map(|line| line.trim().to_lowercase())
        .filter(|line| !line.is_empty())
        .collect()
}

fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let (Some(structure_path), Some(words_path)) = (args.next(), args.next()) else {
        eprintln!("Usage: crossfill <structure> <words>");
        process::exit(2);
    };

    let template = fs::read_to_string(&structure_path)
        .expect("Something went wrong reading the structure file");
    let grid = match Grid::from_template(&template) {
        Ok(grid) => grid,
        Err(err) => {
            eprintln!("Invalid structure file: {}", err);
            process::exit(1);
        }
    };

    let words = load_word_list(&words_path);

    let mut solver = Solver::new(&grid, &words);
    match solver.solve() {
        Some(assignment) => {
            println!("{}", render_grid(&grid, &assignment));
            println!("{:?}", solver.statistics());
        }
        None => println!("No solution."),
    }
}
