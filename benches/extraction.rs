use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dealer_crawler::{
    extract_vehicle_links, parse_mileage, parse_price, parse_vehicle_details, total_pages,
    CacheSettings, EvictionPolicy, MemoCache, SelectorSet, SiteSelectors,
};
use scraper::Html;
use std::time::Duration;
use tokio::runtime::Runtime;
use url::Url;

// Fast settings for all benchmarks
fn configure_fast_group(group: &mut criterion::BenchmarkGroup<criterion::measurement::WallTime>) {
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_millis(500));
    group.sample_size(20);
}

fn selectors() -> SelectorSet {
    SelectorSet::try_from(&SiteSelectors::default()).unwrap()
}

fn listing_page(vehicles: usize) -> String {
    let anchors: String = (0..vehicles)
        .map(|n| format!(r#"<a data-testid="car-blade-link" href="/details/{n}">Vehicle {n}</a>"#))
        .collect();
    format!(
        r#"<html><body><div class="pagination"><span>Page 1 of 12</span></div><div class="results">{anchors}</div></body></html>"#
    )
}

fn detail_page() -> String {
    let stats: String = [
        ("Make:", "Honda"),
        ("Model:", "Accord"),
        ("Year:", "2019"),
        ("Body Type:", "Sedan"),
        ("VIN:", "1HGCM82633A004352"),
        ("Stock Number:", "A1234"),
    ]
    .iter()
    .map(|(label, value)| {
        format!(r#"<li><span class="_label_zbkq7_7">{label}</span><span class="_value_zbkq7_14">{value}</span></li>"#)
    })
    .collect();

    format!(
        r#"<html><body>
<div class="_dealInfo_uw1k0_70"><h5 class="WoAzt">$18,450</h5></div>
<ul>
<li class="_listItem_1tanl_14"><h5>Transmission</h5><p>Automatic</p></li>
<li class="_listItem_1tanl_14"><h5>Mileage</h5><p>45,210</p></li>
</ul>
<div class="_records_1vyus_9" data-cg-ft="listing-vdp-stats"><ul>{stats}</ul></div>
</body></html>"#
    )
}

fn benchmark_detail_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("detail_parsing");
    configure_fast_group(&mut group);

    let selectors = selectors();
    let html = detail_page();

    group.bench_function("parse_vehicle_details", |b| {
        b.iter(|| {
            let details = parse_vehicle_details(
                black_box(&html),
                "https://cars.test/details/1",
                "d-1",
                &selectors,
            );
            black_box(details)
        });
    });

    group.bench_function("parse_price", |b| {
        b.iter(|| black_box(parse_price(black_box("$18,450"))));
    });

    group.bench_function("parse_mileage", |b| {
        b.iter(|| black_box(parse_mileage(black_box("45,210"))));
    });

    group.finish();
}

fn benchmark_listing_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("listing_parsing");
    configure_fast_group(&mut group);

    let selectors = selectors();
    let html = listing_page(24);
    let base = Url::parse("https://cars.test/dealer/sunrise").unwrap();

    group.bench_function("total_pages", |b| {
        b.iter(|| {
            let document = Html::parse_document(black_box(&html));
            black_box(total_pages(&document, &selectors))
        });
    });

    group.bench_function("extract_vehicle_links", |b| {
        b.iter(|| {
            let document = Html::parse_document(black_box(&html));
            black_box(extract_vehicle_links(&document, &selectors, &base))
        });
    });

    group.finish();
}

fn benchmark_memo_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("memo_cache");
    configure_fast_group(&mut group);

    let rt = Runtime::new().unwrap();
    let cache: MemoCache<String, u32> = MemoCache::new(
        "bench",
        CacheSettings::new(1000, Duration::from_secs(3600), EvictionPolicy::Lru),
    );
    let key = "https://cars.test/details/1".to_string();
    rt.block_on(cache.get_or_compute(key.clone(), || async { 12 }));

    group.bench_function("hit", |b| {
        b.iter(|| {
            let value = rt.block_on(cache.get_or_compute(key.clone(), || async { 0 }));
            black_box(value)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_detail_parsing,
    benchmark_listing_parsing,
    benchmark_memo_cache
);
criterion_main!(benches);
