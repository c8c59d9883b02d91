use std::collections::VecDeque;

use crate::config::SmoothingConf;

/// Débit (unités/s) entre deux relevés d'un compteur cumulé.
/// Un compteur qui décroît est une remise à zéro : débit nul, jamais négatif.
pub fn counter_rate(current: u64, previous: u64, elapsed_secs: f64) -> f64 {
    if current < previous || elapsed_secs <= 0.0 || !elapsed_secs.is_finite() {
        return 0.0;
    }
    (current - previous) as f64 / elapsed_secs
}

/// Lissage sensible aux pics pour une direction (entrée ou sortie) d'une entité
#[derive(Debug, Clone)]
pub struct RateSmoother {
    conf: SmoothingConf,
    window: VecDeque<f64>,
}

impl RateSmoother {
    pub fn new(conf: SmoothingConf) -> Self {
        Self {
            conf,
            window: VecDeque::with_capacity(conf.window.max(1)),
        }
    }

    /// Ajoute un débit brut et renvoie la valeur publiée
    pub fn push(&mut self, raw: f64) -> f64 {
        let raw = if raw.is_finite() { raw.max(0.0) } else { 0.0 };
        let stored = match self.window.back().copied() {
            None => raw,
            // pic transitoire : on n'adopte que la moitié du chemin
            Some(prev) if raw > prev * self.conf.spike_factor => (prev + raw) / 2.0,
            Some(prev) if raw > prev => prev + (raw - prev) * self.conf.rise_bias,
            Some(_) => raw,
        };
        self.window.push_back(stored);
        while self.window.len() > self.conf.window.max(1) {
            self.window.pop_front();
        }
        self.published()
    }

    /// Moyenne pondérée linéairement, l'échantillon le plus récent pèse le plus
    pub fn published(&self) -> f64 {
        let (num, den) = self
            .window
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(num, den), (i, v)| {
                let w = (i + 1) as f64;
                (num + v * w, den + w)
            });
        if den == 0.0 { 0.0 } else { num / den }
    }

    pub fn last_stored(&self) -> Option<f64> {
        self.window.back().copied()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_reset_yields_zero() {
        let samples = [100u64, 150, 90];
        let rates: Vec<f64> = samples.windows(2).map(|w| counter_rate(w[1], w[0], 1.0)).collect();
        assert_eq!(rates, vec![50.0, 0.0]);
        assert_eq!(counter_rate(200, 100, 0.0), 0.0);
        assert_eq!(counter_rate(200, 100, 4.0), 25.0);
    }

    #[test]
    fn test_spike_is_halved() {
        let mut s = RateSmoother::new(SmoothingConf::default());
        s.push(100.0);
        s.push(1000.0);
        let stored = s.last_stored().unwrap();
        assert!(stored <= (100.0 + 1000.0) / 2.0);
        assert_eq!(stored, 550.0);
    }

    #[test]
    fn test_rise_is_biased_and_fall_is_immediate() {
        let mut s = RateSmoother::new(SmoothingConf::default());
        s.push(100.0);
        s.push(150.0);
        assert!((s.last_stored().unwrap() - 135.0).abs() < 1e-9);
        s.push(20.0);
        assert_eq!(s.last_stored(), Some(20.0));
    }

    #[test]
    fn test_window_is_bounded_and_weighted() {
        let mut s = RateSmoother::new(SmoothingConf::default());
        for v in [10.0, 10.0, 10.0, 10.0] {
            s.push(v);
        }
        assert_eq!(s.len(), 3);
        assert!((s.published() - 10.0).abs() < 1e-9);

        let mut s = RateSmoother::new(SmoothingConf::default());
        s.push(60.0);
        s.push(30.0);
        s.push(0.0);
        // (60*1 + 30*2 + 0*3) / 6
        assert!((s.published() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_overridden_constants() {
        let conf = SmoothingConf { window: 2, spike_factor: 10.0, rise_bias: 1.0 };
        let mut s = RateSmoother::new(conf);
        s.push(100.0);
        s.push(500.0);
        assert_eq!(s.last_stored(), Some(500.0));
        s.push(400.0);
        assert_eq!(s.len(), 2);
    }
}
