use anyhow::{Result, bail};
use chacha20::XChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use itertools::Itertools;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// Uniform random integers drawn from an XChaCha20 keystream.
///
/// Each instance is seeded with a fresh 32-byte key from OS entropy and a
/// nonce counter offset by the current timestamp, so independent sessions
/// never share a key/nonce pair. The nonce counter advances on every
/// keystream draw, including rejected ones.
pub struct KeystreamRng {
    key: [u8; 32],
    nonce_counter: u64,
}

impl KeystreamRng {
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        rand::rng().fill(&mut key[..]);

        let nonce_counter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();

        KeystreamRng { key, nonce_counter }
    }

    /// One 32-bit keystream word under the current nonce.
    fn next_word(&mut self) -> u32 {
        let mut nonce = [0u8; 24];
        nonce[..8].copy_from_slice(&self.nonce_counter.to_le_bytes());
        self.nonce_counter = self.nonce_counter.wrapping_add(1);

        let mut cipher = XChaCha20::new(&self.key.into(), &nonce.into());
        let mut word = [0u8; 4];
        cipher.apply_keystream(&mut word);
        u32::from_le_bytes(word)
    }

    /// Returns a value in `[0, range)` drawn exactly uniformly, for `range >= 1`.
    ///
    /// Modulo bias is removed by rejection sampling on the low half of the
    /// 64-bit product `sample * range` (Lemire's method). The rejection loop
    /// is deliberately uncapped; it terminates with probability 1 and the
    /// expected number of draws is below 2 for any range.
    pub fn next_uniform(&mut self, range: u32) -> u32 {
        debug_assert!(range >= 1);
        let limit = u32::MAX - (range - 1);
        let threshold = limit % range;

        loop {
            let sample = self.next_word();
            let m = u64::from(sample) * u64::from(range);
            let low = m as u32;
            let high = (m >> 32) as u32;
            if low >= threshold {
                return high;
            }
        }
    }
}

impl Default for KeystreamRng {
    fn default() -> Self {
        Self::new()
    }
}

/// A single grid tile. Flags are only meaningful while the tile is hidden;
/// unhiding a tile clears its flag. `adjacent` is kept equal to the true
/// 8-neighborhood mine count whenever mine placement changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Tile {
    mine: bool,
    hidden: bool,
    flagged: bool,
    adjacent: u8,
}

impl Tile {
    pub fn is_mine(&self) -> bool {
        self.mine
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn is_flagged(&self) -> bool {
        self.flagged
    }

    /// Number of mines among the in-bounds 8-neighbors of this tile.
    pub fn adjacent_mines(&self) -> u8 {
        self.adjacent
    }

    fn unhide(&mut self) {
        self.hidden = false;
        self.flagged = false;
    }
}

/// The overall status of a board, derived from tile visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GameState {
    Playing,
    Won,
    Lost,
}

/// The grid itself: `width * height` tiles in row-major order, so the tile
/// at `(x, y)` lives at index `y * width + x`.
///
/// A board is exclusively owned by one caller at a time; every operation
/// below runs to completion before returning and there is no interior
/// locking. Throwaway copies made for difficulty measurement never alias
/// the live board.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Board {
    pub width: usize,
    pub height: usize,
    tiles: Vec<Tile>,
}

impl Board {
    /// Builds a board with exactly `mine_count` mines placed uniformly.
    ///
    /// The first `mine_count` tiles are marked as mines in index order and
    /// the whole sequence is then permuted with [`KeystreamRng`]: at each
    /// position `i` a partner `j` is drawn from `[0, total - i)` and the two
    /// tiles are swapped. If `mine_count >= width * height` every tile is a
    /// mine and the shuffle is skipped (degenerate but valid).
    pub fn generate(width: usize, height: usize, mine_count: usize) -> Board {
        let total = width * height;
        let tiles = (0..total)
            .map(|i| Tile {
                mine: i < mine_count,
                hidden: true,
                flagged: false,
                adjacent: 0,
            })
            .collect();
        let mut board = Board {
            width,
            height,
            tiles,
        };

        if mine_count < total {
            let mut rng = KeystreamRng::new();
            for i in 0..total {
                let j = rng.next_uniform((total - i) as u32) as usize;
                board.tiles.swap(i, j);
            }
        }

        board.recompute_adjacency();
        debug!(width, height, mine_count, "generated board");
        board
    }

    /// Regenerates boards until one needs at least `target_clicks` greedy
    /// clicks to clear, keeping the hardest board seen.
    ///
    /// The retry budget is a hard cap of 100 attempts; if no attempt reaches
    /// the target the best board found so far is returned. This is
    /// optimization by resampling, not a difficulty guarantee.
    pub fn with_minimum_difficulty(
        width: usize,
        height: usize,
        mine_count: usize,
        target_clicks: usize,
    ) -> Board {
        const MAX_ATTEMPTS: usize = 100;

        let mut best = Board::generate(width, height, mine_count);
        let mut best_clicks = best.estimate_minimum_clicks();
        trace!(attempt = 1, clicks = best_clicks, "difficulty sample");

        for attempt in 2..=MAX_ATTEMPTS {
            if best_clicks >= target_clicks {
                break;
            }
            let candidate = Board::generate(width, height, mine_count);
            let clicks = candidate.estimate_minimum_clicks();
            trace!(attempt, clicks, "difficulty sample");
            if clicks > best_clicks {
                best = candidate;
                best_clicks = clicks;
            }
        }

        debug!(
            clicks = best_clicks,
            target_clicks, "kept hardest generated board"
        );
        best
    }

    pub fn tile(&self, index: usize) -> Option<&Tile> {
        self.tiles.get(index)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter()
    }

    pub fn index_of(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn mine_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.mine).count()
    }

    /// Win/loss status derived from tile visibility: lost as soon as any
    /// mine is revealed, won once only the mines remain hidden.
    pub fn state(&self) -> GameState {
        let mut revealed_safe = 0;
        for tile in &self.tiles {
            if !tile.hidden {
                if tile.mine {
                    return GameState::Lost;
                }
                revealed_safe += 1;
            }
        }
        if self.tiles.len() - revealed_safe == self.mine_count() {
            GameState::Won
        } else {
            GameState::Playing
        }
    }

    /// Reveals the tile at `index`, cascading through the surrounding
    /// zero-count region when the tile has no adjacent mines.
    ///
    /// Revealing an already-revealed tile is a no-op. Revealing a mine
    /// uncovers that single tile (the losing move) and never cascades; the
    /// cascade itself can never reach a mine because zero-count tiles have
    /// none as neighbors. Fails on an out-of-range index.
    pub fn reveal(&mut self, index: usize) -> Result<()> {
        if index >= self.tiles.len() {
            bail!(
                "reveal index {index} out of bounds for {}x{} board",
                self.width,
                self.height
            );
        }
        self.reveal_at(index);
        Ok(())
    }

    /// Scanline flood fill. Each popped tile's row is swept left and right
    /// up to and including the first mine-adjacent tile in each direction,
    /// probing the tiles directly above and below at every step: a
    /// zero-count vertical neighbor starts a new run (enqueued once per
    /// contiguous segment, tracked by the wall flags), a mine-adjacent one
    /// is uncovered as a boundary and re-arms the wall.
    fn reveal_at(&mut self, index: usize) {
        if !self.tiles[index].hidden {
            return;
        }

        // Traversal state lives only for this call, never on the tiles.
        let mut visited = vec![false; self.tiles.len()];
        let mut worklist: Vec<usize> = Vec::new();

        self.uncover(index, &mut visited);
        if self.tiles[index].mine || self.tiles[index].adjacent > 0 {
            return;
        }

        worklist.push(index);
        let mut head = 0;
        while head < worklist.len() {
            let tile = worklist[head];
            head += 1;

            let row_start = tile - tile % self.width;
            let row_end = row_start + self.width;

            let mut wall_above = true;
            let mut wall_below = true;
            self.probe_column(
                tile,
                &mut wall_above,
                &mut wall_below,
                &mut visited,
                &mut worklist,
            );

            // Sweep right, carrying the wall state of the seed tile.
            for idx in tile + 1..row_end {
                self.probe_column(
                    idx,
                    &mut wall_above,
                    &mut wall_below,
                    &mut visited,
                    &mut worklist,
                );
                self.uncover(idx, &mut visited);
                if self.tiles[idx].adjacent > 0 {
                    break;
                }
            }

            // Sweep left with fresh walls.
            let mut wall_above = true;
            let mut wall_below = true;
            for idx in (row_start..tile).rev() {
                self.probe_column(
                    idx,
                    &mut wall_above,
                    &mut wall_below,
                    &mut visited,
                    &mut worklist,
                );
                self.uncover(idx, &mut visited);
                if self.tiles[idx].adjacent > 0 {
                    break;
                }
            }
        }
    }

    /// Probes the tiles directly above and below `idx` during a row sweep.
    fn probe_column(
        &mut self,
        idx: usize,
        wall_above: &mut bool,
        wall_below: &mut bool,
        visited: &mut [bool],
        worklist: &mut Vec<usize>,
    ) {
        if let Some(above) = idx.checked_sub(self.width) {
            self.probe_vertical(above, wall_above, visited, worklist);
        }
        let below = idx + self.width;
        if below < self.tiles.len() {
            self.probe_vertical(below, wall_below, visited, worklist);
        }
    }

    fn probe_vertical(
        &mut self,
        neighbor: usize,
        wall: &mut bool,
        visited: &mut [bool],
        worklist: &mut Vec<usize>,
    ) {
        let near_mine = self.tiles[neighbor].adjacent > 0;
        if *wall && !near_mine && !visited[neighbor] {
            worklist.push(neighbor);
            *wall = false;
        } else if near_mine {
            *wall = true;
        }
        // Boundary tiles are uncovered too; they just never propagate.
        self.uncover(neighbor, visited);
    }

    fn uncover(&mut self, index: usize, visited: &mut [bool]) {
        self.tiles[index].unhide();
        visited[index] = true;
    }

    /// Toggles the flag on a hidden tile; revealed tiles are left alone.
    /// Fails on an out-of-range index.
    pub fn toggle_flag(&mut self, index: usize) -> Result<()> {
        if index >= self.tiles.len() {
            bail!(
                "flag index {index} out of bounds for {}x{} board",
                self.width,
                self.height
            );
        }
        let tile = &mut self.tiles[index];
        if tile.hidden {
            tile.flagged = !tile.flagged;
        }
        Ok(())
    }

    /// Guarantees the player's first click cannot hit a mine.
    ///
    /// If the clicked tile is a mine, its contents are swapped with a
    /// uniformly chosen non-mine tile and all neighbor counts are
    /// recomputed. Call at most once per game, before the first reveal.
    /// Fails on an out-of-range index.
    pub fn ensure_safe_first_click(&mut self, index: usize) -> Result<()> {
        if index >= self.tiles.len() {
            bail!(
                "first-click index {index} out of bounds for {}x{} board",
                self.width,
                self.height
            );
        }
        if !self.tiles[index].mine {
            return Ok(());
        }

        let open: Vec<usize> = (0..self.tiles.len())
            .filter(|&i| !self.tiles[i].mine)
            .collect();
        if open.is_empty() {
            // All-mine board, nowhere to relocate to.
            return Ok(());
        }

        let mut rng = KeystreamRng::new();
        let chosen = open[rng.next_uniform(open.len() as u32) as usize];
        self.tiles.swap(index, chosen);
        self.recompute_adjacency();
        debug!(from = index, to = chosen, "relocated first-click mine");
        Ok(())
    }

    /// Counts the clicks a greedy, hint-driven solver needs to clear this
    /// board, on a throwaway copy with every tile reset to hidden.
    ///
    /// Pass one clicks every zero-count tile still hidden (each cascade
    /// clears a whole region), pass two clicks the numbered tiles the
    /// cascades never reached. Deterministic for a fixed board, and a
    /// difficulty proxy only: flag-based deduction is not modeled, so a
    /// logically optimal solver may need fewer clicks.
    pub fn estimate_minimum_clicks(&self) -> usize {
        let mut probe = self.clone();
        for tile in &mut probe.tiles {
            tile.hidden = true;
            tile.flagged = false;
        }

        let mut clicks = 0;
        for i in 0..probe.tiles.len() {
            let tile = probe.tiles[i];
            if !tile.mine && tile.hidden && tile.adjacent == 0 {
                probe.reveal_at(i);
                clicks += 1;
            }
        }
        for i in 0..probe.tiles.len() {
            let tile = probe.tiles[i];
            if !tile.mine && tile.hidden {
                probe.reveal_at(i);
                clicks += 1;
            }
        }
        clicks
    }

    /// Recomputes every tile's 8-neighborhood mine count. Must run after
    /// any change to mine placement.
    fn recompute_adjacency(&mut self) {
        for index in 0..self.tiles.len() {
            let count = self
                .neighbors(index)
                .filter(|&n| self.tiles[n].mine)
                .count();
            self.tiles[index].adjacent = count as u8;
        }
    }

    /// Indices of the in-bounds 8-neighbors of `index`, via explicit signed
    /// coordinate arithmetic.
    fn neighbors(&self, index: usize) -> impl Iterator<Item = usize> {
        let x = (index % self.width) as isize;
        let y = (index / self.width) as isize;
        let (w, h) = (self.width as isize, self.height as isize);

        (-1isize..=1)
            .cartesian_product(-1isize..=1)
            .filter(|&offset| offset != (0, 0))
            .filter_map(move |(dx, dy)| {
                let (nx, ny) = (x + dx, y + dy);
                (nx >= 0 && nx < w && ny >= 0 && ny < h).then(|| (ny * w + nx) as usize)
            })
    }
}
