use cadence_core::config::GenerationConfig;
use cadence_core::generator::InstanceGenerator;
use cadence_core::models::{Interval, MonthOccurrence, RecurrenceTemplate, RecurringTask};
use cadence_core::recurrence::{advance_from, RecurrenceCalculator};
use chrono::{Duration, TimeZone, Utc, Weekday};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn create_recurring_task(intervals: Vec<Interval>) -> RecurringTask {
    RecurringTask {
        title: "Benchmark Task".to_string(),
        start_date: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
        intervals,
        ..Default::default()
    }
}

fn bench_next_occurrence_calculation(c: &mut Criterion) {
    let base = Utc.with_ymd_and_hms(2024, 1, 31, 9, 0, 0).unwrap();
    let templates = [
        ("daily", RecurrenceTemplate::sequential("Daily", vec![Interval::days(1)])),
        ("monthly_clamped", RecurrenceTemplate::sequential("Monthly", vec![Interval::months(1)])),
        (
            "chained",
            RecurrenceTemplate::sequential("Chained", vec![Interval::weeks(2), Interval::days(3), Interval::months(1)]),
        ),
        (
            "last_friday",
            RecurrenceTemplate::weekday_occurrence("Last Friday", vec![Interval::months(1)], Weekday::Fri, MonthOccurrence::Last),
        ),
    ];

    let mut group = c.benchmark_group("next_occurrence");
    for (name, template) in templates.iter() {
        group.bench_with_input(BenchmarkId::new("template", name), template, |b, template| {
            b.iter(|| RecurrenceCalculator::next_occurrence(black_box(template), black_box(base)).unwrap())
        });
    }
    group.finish();
}

fn bench_advance_from(c: &mut Criterion) {
    let from = Utc.with_ymd_and_hms(2024, 1, 31, 9, 0, 0).unwrap();
    let intervals = vec![Interval::months(1)];

    c.bench_function("advance_from_months", |b| {
        b.iter(|| advance_from(black_box(from), black_box(&intervals), Duration::days(365)))
    });
}

fn bench_series_generation(c: &mut Criterion) {
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
    let recurring_task = create_recurring_task(vec![Interval::days(1)]);

    let mut group = c.benchmark_group("series_generation");
    for days in [7u32, 30, 90, 365].iter() {
        let generator = InstanceGenerator::new(GenerationConfig {
            advance_horizon_days: *days,
            ..Default::default()
        });
        group.bench_with_input(BenchmarkId::new("horizon_days", days), days, |b, _| {
            b.iter(|| generator.generate(black_box(&recurring_task), black_box(now)))
        });
    }
    group.finish();
}

fn bench_past_start_catch_up(c: &mut Criterion) {
    let now = Utc.with_ymd_and_hms(2030, 1, 1, 9, 0, 0).unwrap();
    let recurring_task = create_recurring_task(vec![Interval::days(1)]);
    let generator = InstanceGenerator::with_defaults();

    c.bench_function("catch_up_six_years_daily", |b| {
        b.iter(|| generator.calculate_occurrences(black_box(&recurring_task), black_box(now)))
    });
}

criterion_group!(
    benches,
    bench_next_occurrence_calculation,
    bench_advance_from,
    bench_series_generation,
    bench_past_start_catch_up
);
criterion_main!(benches);
