use criterion::Criterion;

use gammafit::{BackgroundSpec, FitArgs, Param, TheuerkaufFitter, TheuerkaufPeak};

fn synthetic_spectrum() -> FitArgs<'static, 'static> {
    let reference = TheuerkaufPeak::new(Param::fixed(100.0), Param::fixed(8000.0), Param::fixed(2.0))
        .with_left_tail(Param::fixed(2.5));
    let channels: Vec<f64> = (0..200).map(|i| i as f64 + 0.5).collect();
    let counts: Vec<f64> = channels
        .iter()
        .map(|&x| 25.0 + reference.eval(x))
        .collect();
    FitArgs::from((channels, counts))
}

fn peak_eval(c: &mut Criterion) {
    let peak = TheuerkaufPeak::new(Param::fixed(100.0), Param::fixed(8000.0), Param::fixed(2.0))
        .with_left_tail(Param::fixed(2.5))
        .with_step(Param::fixed(0.02), Param::fixed(1.0));

    c.bench_function("tailed_peak_eval", |b| {
        b.iter(|| {
            (0..200)
                .map(|i| peak.eval(i as f64 + 0.5))
                .sum::<f64>()
        })
    });
}

fn tailed_peak_fitting(c: &mut Criterion) {
    let data = synthetic_spectrum();

    c.bench_function("tailed_peak_fit", |b| {
        b.iter(|| {
            let mut fitter = TheuerkaufFitter::new(50.0, 150.0).unwrap();
            fitter.add_peak(
                TheuerkaufPeak::new(Param::free(99.0), Param::free(6000.0), Param::free(1.8))
                    .with_left_tail(Param::free(3.0)),
            );
            fitter.fit(&data, BackgroundSpec::Poly(0)).unwrap()
        })
    });
}

fn fitting(c: &mut Criterion) {
    peak_eval(c);
    tailed_peak_fitting(c);
}

criterion::criterion_group!(benches, fitting);
criterion::criterion_main!(benches);
