//! Rollierende Sitzungs-IDs fuer Logausgaben
//!
//! Vier Hex-Ziffern aus festen Permutationstabellen. Aufeinanderfolgende
//! IDs unterscheiden sich in allen Stellen, damit parallele Sitzungen im
//! Log leicht zu trennen sind.

use std::sync::OnceLock;

use parking_lot::Mutex;
use rand::Rng;

const ZIFFER0: [u8; 16] = [15, 12, 5, 6, 4, 9, 0, 1, 2, 10, 13, 11, 3, 8, 14, 7];
const ZIFFER1: [u8; 16] = [11, 3, 14, 4, 13, 1, 5, 7, 6, 8, 10, 9, 0, 15, 12, 2];
const ZIFFER2: [u8; 16] = [15, 1, 8, 12, 5, 11, 6, 7, 10, 14, 4, 9, 13, 0, 3, 2];
const ZIFFER3: [u8; 16] = [4, 11, 13, 2, 5, 3, 9, 6, 8, 15, 14, 1, 7, 10, 0, 12];

/// Erzeugt 4-stellige Sitzungs-IDs wie `A3F0`
#[derive(Debug)]
pub struct SessionIdGenerator {
    zaehler: Mutex<[usize; 4]>,
}

impl SessionIdGenerator {
    /// Generator mit zufaelligen Startwerten
    pub fn neu() -> Self {
        let mut rng = rand::thread_rng();
        Self::mit_start([
            rng.gen_range(0..16),
            rng.gen_range(0..16),
            rng.gen_range(0..16),
            rng.gen_range(0..16),
        ])
    }

    /// Generator mit festen Startwerten (Index 0 = niedrigste Stelle)
    pub fn mit_start(start: [usize; 4]) -> Self {
        Self {
            zaehler: Mutex::new(start.map(|z| z % 16)),
        }
    }

    pub fn naechste(&self) -> String {
        let mut z = self.zaehler.lock();

        let id = format!(
            "{:X}{:X}{:X}{:X}",
            ZIFFER3[z[3]], ZIFFER2[z[2]], ZIFFER1[z[1]], ZIFFER0[z[0]]
        );

        for zaehler in z.iter_mut() {
            *zaehler = (*zaehler + 1) % 16;
        }

        // Uebertrag, sobald die niedrigste Stelle eine Runde geschafft hat
        if z[0] == 0 {
            for stelle in 1..4 {
                z[stelle] = (z[stelle] + 1) % 16;
                if z[stelle] != 0 {
                    break;
                }
            }
        }

        id
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::neu()
    }
}

/// Naechste ID aus dem prozessweiten Generator
pub fn naechste_session_id() -> String {
    static GENERATOR: OnceLock<SessionIdGenerator> = OnceLock::new();
    GENERATOR.get_or_init(SessionIdGenerator::neu).naechste()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn erste_id_aus_tabellen() {
        let gen = SessionIdGenerator::mit_start([0, 0, 0, 0]);
        assert_eq!(gen.naechste(), "4FBF");
        assert_eq!(gen.naechste(), "B13C");
    }

    #[test]
    fn immer_vier_grossbuchstaben_hex() {
        let gen = SessionIdGenerator::neu();
        for _ in 0..100 {
            let id = gen.naechste();
            assert_eq!(id.len(), 4);
            assert!(id.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
        }
    }

    #[test]
    fn uebertrag_bei_umlauf() {
        let gen = SessionIdGenerator::mit_start([15, 15, 15, 15]);
        gen.naechste();
        // Alle auf 0, dann Uebertrag in Stelle 1
        assert_eq!(*gen.zaehler.lock(), [0, 1, 0, 0]);
    }

    #[test]
    fn keine_wiederholung_in_kurzer_folge() {
        let gen = SessionIdGenerator::mit_start([3, 7, 1, 9]);
        let ids: HashSet<_> = (0..16).map(|_| gen.naechste()).collect();
        assert_eq!(ids.len(), 16);
    }

    #[test]
    fn prozessweiter_generator_liefert_ids() {
        assert_eq!(naechste_session_id().len(), 4);
    }
}
