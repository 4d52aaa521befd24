use minesweeper_core::{Board, GameState};
use std::thread;
use std::time::Duration;

/// Stock difficulty presets. These belong to the presentation layer; the
/// core only ever sees the raw numbers.
struct Preset {
    name: &'static str,
    width: usize,
    height: usize,
    mines: usize,
    target_clicks: usize,
}

const EASY: Preset = Preset {
    name: "easy",
    width: 9,
    height: 9,
    mines: 10,
    target_clicks: 3,
};
const INTERMEDIATE: Preset = Preset {
    name: "intermediate",
    width: 16,
    height: 16,
    mines: 40,
    target_clicks: 6,
};
const EXPERT: Preset = Preset {
    name: "expert",
    width: 30,
    height: 16,
    mines: 99,
    target_clicks: 9,
};

fn main() {
    tracing_subscriber::fmt().init();

    let preset = match std::env::args().nth(1).as_deref() {
        Some("intermediate") => INTERMEDIATE,
        Some("expert") => EXPERT,
        _ => EASY,
    };

    println!("--- Minesweeper Greedy Playthrough ({}) ---", preset.name);
    let mut board = Board::with_minimum_difficulty(
        preset.width,
        preset.height,
        preset.mines,
        preset.target_clicks,
    );
    println!(
        "Generated a {}x{} board with {} mines, estimated {} clicks to clear (target {}).",
        board.width,
        board.height,
        board.mine_count(),
        board.estimate_minimum_clicks(),
        preset.target_clicks,
    );
    print_board(&board);

    // Play the way the estimator counts: cascade-triggering zero tiles
    // first, then the numbered tiles the cascades never reached.
    let mut clicks = 0;
    let mut first_click = true;
    for pass in 0..2 {
        for index in 0..board.width * board.height {
            let tile = *board.tile(index).expect("index in bounds");
            let clickable =
                !tile.is_mine() && tile.is_hidden() && (pass == 1 || tile.adjacent_mines() == 0);
            if !clickable {
                continue;
            }

            if first_click {
                first_click = false;
                board
                    .ensure_safe_first_click(index)
                    .expect("index in bounds");
            }
            board.reveal(index).expect("index in bounds");
            clicks += 1;

            println!(
                "\n--- Click #{} at ({}, {}) ---",
                clicks,
                index % board.width,
                index / board.width
            );
            print_board(&board);
            thread::sleep(Duration::from_millis(300));
        }
    }

    match board.state() {
        GameState::Won => println!("Cleared the board in {clicks} clicks."),
        GameState::Lost => println!("Hit a mine after {clicks} clicks."),
        GameState::Playing => println!("Stopped after {clicks} clicks with tiles still hidden."),
    }
}

fn print_board(board: &Board) {
    // Print header
    print!("   ");
    for x in 0..board.width {
        print!("{:^3}", x);
    }
    println!("\n  +{}", "---".repeat(board.width));

    // Print rows
    for y in 0..board.height {
        print!("{:^2}|", y);
        for x in 0..board.width {
            let tile = board.tile(board.index_of(x, y)).expect("index in bounds");
            let display = if tile.is_hidden() {
                if tile.is_flagged() {
                    " ⚑ ".to_string()
                } else {
                    " ■ ".to_string()
                }
            } else if tile.is_mine() {
                " * ".to_string()
            } else {
                format!(" {} ", tile.adjacent_mines())
            };
            print!("{display}");
        }
        println!();
    }
    println!();
}
