use dotenvy::dotenv;
use envconfig::Envconfig;

use medminder::db::models::{NewMedicine, NewUser, Slot, Timings};
use medminder::db::{MedicineStore, PgStore, StoreError};

#[derive(Envconfig)]
struct SeedConfig {
    #[envconfig(from = "DATABASE_URL")]
    database_url: String,

    #[envconfig(from = "SEED_EMAIL", default = "demo@example.com")]
    email: String,
}

fn timings(slots: &[(Slot, &str)]) -> Timings {
    slots.iter().map(|(slot, time)| (*slot, time.to_string())).collect()
}

fn get_seed_data() -> Vec<NewMedicine> {
    vec![
        NewMedicine {
            name: "Metformin".to_string(),
            quantity: 60,
            timings: timings(&[(Slot::Morning, "08:00"), (Slot::Evening, "19:00")]),
        },
        NewMedicine {
            name: "Lisinopril".to_string(),
            quantity: 30,
            timings: timings(&[(Slot::Morning, "08:00")]),
        },
        NewMedicine {
            name: "Levothyroxine".to_string(),
            quantity: 1,
            timings: timings(&[(Slot::Morning, "06:30")]),
        },
        NewMedicine {
            name: "Omeprazole".to_string(),
            quantity: 0,
            timings: timings(&[(Slot::Noon, "12:30")]),
        },
        NewMedicine {
            name: "Melatonin".to_string(),
            quantity: 14,
            timings: timings(&[(Slot::Night, "22:00")]),
        },
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    dotenv().ok();

    let config = SeedConfig::init_from_env()?;
    let store = PgStore::connect(&config.database_url).await?;

    match store
        .create_user(NewUser {
            email: config.email.clone(),
            chat_id: None,
        })
        .await
    {
        Ok(_) => log::info!("Created demo user {}", config.email),
        Err(StoreError::EmailTaken(_)) => log::info!("Demo user {} already exists", config.email),
        Err(e) => return Err(e.into()),
    }

    for medicine in get_seed_data() {
        let name = medicine.name.clone();
        store.add_medicine(&config.email, medicine).await?;
        log::info!("Seeded {}", name);
    }

    log::info!("Seed data inserted successfully");
    Ok(())
}
