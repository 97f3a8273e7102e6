use chrono::{Duration, NaiveDate, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use noah_risk::{Observation, Patient, RiskEngine};

fn cohort(patients: usize, per_marker: usize) -> (Vec<Patient>, Vec<Observation>) {
    let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let patients: Vec<Patient> = (0..patients).map(|i| Patient::new(format!("patient-{i}"))).collect();
    let mut observations = Vec::with_capacity(patients.len() * per_marker * 2);
    for (i, patient) in patients.iter().enumerate() {
        for n in 0..per_marker {
            let at = Some(start + Duration::days((n * 30) as i64));
            let hba1c = 5.0 + ((i + n) % 30) as f64 / 10.0;
            let cholesterol = 150.0 + ((i * 7 + n) % 150) as f64;
            observations.push(Observation::new(format!("h-{i}-{n}"), &patient.id, "Hemoglobin A1c", hba1c, at));
            observations.push(Observation::new(format!("c-{i}-{n}"), &patient.id, "Cholesterol", cholesterol, at));
        }
    }
    (patients, observations)
}

fn scoring_benchmark(c: &mut Criterion) {
    let engine = RiskEngine::default();
    let as_of = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let (patients, observations) = cohort(10_000, 6);

    c.bench_function("score 10k patients x 12 observations", |b| {
        b.iter(|| engine.score(black_box(&patients), black_box(&observations), as_of))
    });
}

criterion_group!(benches, scoring_benchmark);
criterion_main!(benches);
