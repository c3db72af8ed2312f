use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

use staydb::config::{FileConfig, SqliteConfig, StorageConfig};
use staydb::{Amenity, City, Entity, EntityType, Listing, Region, Registry, Resolver, User};

fn config(dir: &TempDir, backend: &str) -> StorageConfig {
    let path = |name: &str| dir.path().join(name).to_str().unwrap().to_string();
    StorageConfig {
        backend: backend.to_string(),
        file: FileConfig {
            path: path("file.json"),
        },
        sqlite: SqliteConfig {
            path: path("staydb.sqlite"),
        },
    }
}

fn seed_data(registry: &Registry) {
    let region = Entity::new(Region::new("California"));
    let owner = Entity::new(User::new("host@example.com", "pw"));
    registry.register(region.clone()).unwrap();
    registry.register(owner.clone()).unwrap();

    let amenities: Vec<Entity> = (0..10).map(|i| Entity::new(Amenity::new(format!("Amenity {}", i)))).collect();
    for a in &amenities {
        registry.register(a.clone()).unwrap();
    }

    // 10 cities with 20 listings each
    for c in 0..10 {
        let city = Entity::new(City::new(region.id().clone(), format!("City {}", c)));
        registry.register(city.clone()).unwrap();
        for l in 0..20 {
            let listing = Entity::new(Listing::new(owner.id().clone(), city.id().clone(), format!("Listing {}-{}", c, l)));
            registry.register(listing).unwrap();
        }
    }
    registry.flush().unwrap();

    let resolver = Resolver::new(registry);
    for mut listing in registry.all(Some(EntityType::Listing)).unwrap().into_values() {
        for a in amenities.iter().take(3) {
            resolver.link(&mut listing, a).unwrap();
        }
    }
}

fn bench_flush(c: &mut Criterion) {
    for backend in ["file", "db"] {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::from_config(&config(&dir, backend)).unwrap();
        seed_data(&registry);
        let mut region = registry
            .all(Some(EntityType::Region))
            .unwrap()
            .into_values()
            .next()
            .unwrap();

        c.bench_function(&format!("save_one_{}", backend), |b| {
            b.iter(|| registry.save(black_box(&mut region)).unwrap())
        });
    }
}

fn bench_initialize(c: &mut Criterion) {
    for backend in ["file", "db"] {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, backend);
        seed_data(&Registry::from_config(&config).unwrap());

        c.bench_function(&format!("initialize_{}", backend), |b| {
            b.iter(|| Registry::from_config(black_box(&config)).unwrap())
        });
    }
}

fn bench_children_of(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::from_config(&config(&dir, "db")).unwrap();
    seed_data(&registry);
    let city = registry.all(Some(EntityType::City)).unwrap().into_values().next().unwrap();
    let resolver = Resolver::new(&registry);

    c.bench_function("children_of_db", |b| {
        b.iter(|| resolver.children_of(black_box(&city), EntityType::Listing).unwrap().count())
    });
}

criterion_group!(benches, bench_flush, bench_initialize, bench_children_of);
criterion_main!(benches);
