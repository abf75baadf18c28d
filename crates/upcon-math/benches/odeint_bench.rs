use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use upcon_math::odeint::{AdamsStepper, OdeOptions, OdeSystem, Stepper, StiffStepper};

/// Linear decay chain with rate constants spanning five decades, the
/// stiffness profile of a small doped-crystal rate system.
struct DecayChain {
    rates: Vec<f64>,
}

impl DecayChain {
    fn new(n: usize) -> Self {
        let rates = (0..n).map(|i| 10f64.powi(i as i32 % 6)).collect();
        Self { rates }
    }
}

impl OdeSystem for DecayChain {
    fn ndim(&self) -> usize {
        self.rates.len()
    }

    fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
        let n = self.rates.len();
        for i in 0..n {
            dydt[i] = -self.rates[i] * y[i];
            if i > 0 {
                dydt[i] += self.rates[i - 1] * y[i - 1];
            }
        }
    }

    fn jacobian(&self, _t: f64, _y: &[f64], jac: &mut [f64]) {
        let n = self.rates.len();
        jac.fill(0.0);
        for i in 0..n {
            jac[i * n + i] = -self.rates[i];
            if i > 0 {
                jac[i * n + (i - 1)] = self.rates[i - 1];
            }
        }
    }
}

fn initial_state(n: usize) -> Vec<f64> {
    let mut y0 = vec![0.0; n];
    y0[0] = 1.0;
    y0
}

fn bench_stiff_chain_12(c: &mut Criterion) {
    let sys = DecayChain::new(12);
    let y0 = initial_state(12);

    c.bench_function("stiff_chain_12_to_t1", |b| {
        b.iter(|| {
            let mut st = StiffStepper::new(&sys, &y0, 0.0, OdeOptions::default()).unwrap();
            st.step_to(1.0).unwrap();
            black_box(st.y()[11]);
        })
    });
}

fn bench_stiff_vs_adams_smooth(c: &mut Criterion) {
    let sys = DecayChain::new(4);
    let y0 = initial_state(4);

    let mut group = c.benchmark_group("smooth_chain_4_to_t1e-3");
    group.sample_size(10);

    group.bench_function("stiff", |b| {
        b.iter(|| {
            let mut st = StiffStepper::new(&sys, &y0, 0.0, OdeOptions::default()).unwrap();
            st.step_to(1e-3).unwrap();
            black_box(st.y()[3]);
        })
    });

    group.bench_function("adams", |b| {
        b.iter(|| {
            let mut ad = AdamsStepper::new(&sys, &y0, 0.0, OdeOptions::default()).unwrap();
            ad.step_to(1e-3).unwrap();
            black_box(ad.y()[3]);
        })
    });

    group.finish();
}

fn bench_grid_walk(c: &mut Criterion) {
    let sys = DecayChain::new(8);
    let y0 = initial_state(8);
    let grid: Vec<f64> = (1..=100).map(|i| i as f64 * 0.01).collect();

    c.bench_function("stiff_chain_8_walk_100_points", |b| {
        b.iter(|| {
            let mut st = StiffStepper::new(&sys, &y0, 0.0, OdeOptions::default()).unwrap();
            for &t in &grid {
                st.step_to(t).unwrap();
            }
            black_box(st.y()[7]);
        })
    });
}

criterion_group!(
    benches,
    bench_stiff_chain_12,
    bench_stiff_vs_adams_smooth,
    bench_grid_walk
);
criterion_main!(benches);
