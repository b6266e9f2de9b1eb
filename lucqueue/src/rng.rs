//! Générateur pseudo-aléatoire de la file de lecture.
//!
//! Park & Miller « Minimal Standard » avec brassage de Bays-Durham
//! (Numerical Recipes in C, 2e éd.), graine tirée d'une source forte à la
//! construction. `rand_range` écarte le biais du modulo par rejet.

use rand::Rng as _;

const SHUFFLE_SLOTS: usize = 32;
const MODULUS: i32 = 0x7fff_ffff; // 2147483647

/// Contexte du générateur
#[derive(Debug, Clone)]
pub struct Rng {
    seed: i32,
    table: [i32; SHUFFLE_SLOTS],
    current: i32,
}

fn next_raw(seed: &mut i32) -> i32 {
    let hi = *seed / 127_773;
    let lo = *seed % 127_773;

    let mut res = 16_807 * lo - 2_836 * hi;
    if res < 0 {
        res += MODULUS;
    }

    *seed = res;
    res
}

impl Rng {
    /// Graine forte tirée du système
    pub fn new() -> Self {
        let mut seed: i32 = rand::rng().random();
        if seed == 0 {
            seed = 1;
        }
        Self::with_seed(seed)
    }

    /// Graine explicite (tests et rejouabilité)
    pub fn with_seed(seed: i32) -> Self {
        let mut seed = match seed.checked_abs() {
            Some(0) | None => 1,
            Some(positive) => positive,
        };
        let mut table = [0i32; SHUFFLE_SLOTS];

        // Chargement du tableau de brassage, les 8 premiers tirages jetés
        for i in (0..SHUFFLE_SLOTS + 8).rev() {
            let val = next_raw(&mut seed);
            if i < SHUFFLE_SLOTS {
                table[i] = val;
            }
        }

        let current = table[0];
        Rng {
            seed,
            table,
            current,
        }
    }

    /// Prochain tirage dans `[0, 2^31)`
    pub fn rand(&mut self) -> i32 {
        let slot = (self.current / (1 + (MODULUS - 1) / SHUFFLE_SLOTS as i32)) as usize;
        self.current = self.table[slot];
        self.table[slot] = next_raw(&mut self.seed);
        self.current
    }

    /// Entier dans `[min, max)` sans biais de modulo
    pub fn rand_range(&mut self, min: i32, max: i32) -> i32 {
        let dist = max - min;
        if dist <= 0 {
            return min;
        }

        // maxvalue est le prédécesseur du plus grand multiple de dist
        let leftover = {
            let mut left = (0x8000_0000u32 % dist as u32) * 2;
            if left >= dist as u32 {
                left -= dist as u32;
            }
            left
        };
        let maxvalue = u32::MAX - leftover;

        let mut res;
        loop {
            res = self.rand() as u32;
            if res <= maxvalue {
                break;
            }
        }

        min + (res % dist as u32) as i32
    }

    /// Permutation de Durstenfeld en place
    pub fn shuffle<T>(&mut self, values: &mut [T]) {
        for i in (1..values.len()).rev() {
            let j = self.rand_range(0, i as i32 + 1) as usize;
            values.swap(i, j);
        }
    }
}

impl Default for Rng {
    fn default() -> Self {
        Self::new()
    }
}
