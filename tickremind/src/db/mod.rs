pub mod models;
pub mod schema;

use self::models::{Entry, NewEntry, NewRule, Rule, Settings};

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::proto::Error as ServiceError;
use crate::proto::{Dashboard, RuleListing, TickEntryValue, TickRule, UserSettings};
use actix::{Actor, Addr, Handler, Message, SyncArbiter, SyncContext};
use failure::{format_err, Error};
use log::{debug, info};
use r2d2::Pool;
use uuid::Uuid;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// SQLite caps bound parameters per statement, batch inserts are split.
const INSERT_CHUNK: usize = 1000;

pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

#[derive(Debug)]
struct ConnectionSetup;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionSetup {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Opens the connection pool and brings the schema up to date.
///
/// `:memory:` databases live and die with their connection, so they get a
/// single connection that is never recycled.
pub fn open_pool(url: &str, pool_size: u32) -> Result<SqlitePool, Error> {
    let in_memory = url == ":memory:";
    let manager = ConnectionManager::<SqliteConnection>::new(url);

    let mut builder = Pool::builder().connection_customizer(Box::new(ConnectionSetup));
    builder = if in_memory {
        builder.max_size(1).max_lifetime(None).idle_timeout(None)
    } else {
        builder.max_size(pool_size)
    };
    let pool = builder.build(manager)?;

    let mut conn = pool.get()?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| format_err!("failed to migrate {}: {}", url, e))?;
    info!("database {} ready, {} migrations applied", url, applied.len());

    Ok(pool)
}

/// This is db executor actor. `database.executors` of them run in parallel.
pub struct DbExecutor(pub SqlitePool);

impl Actor for DbExecutor {
    type Context = SyncContext<Self>;
}

pub fn start_executors(pool: SqlitePool, executors: usize) -> Addr<DbExecutor> {
    SyncArbiter::start(executors, move || DbExecutor(pool.clone()))
}

fn load_settings(conn: &mut SqliteConnection, owner: &str) -> Result<Option<Settings>, Error> {
    use self::schema::user_settings::dsl::*;

    let settings = user_settings
        .find(owner)
        .select(Settings::as_select())
        .first(conn)
        .optional()?;

    Ok(settings)
}

fn require_settings(conn: &mut SqliteConnection, owner: &str) -> Result<Settings, Error> {
    load_settings(conn, owner)?.ok_or_else(|| {
        ServiceError::SettingsNotFound {
            identity: owner.to_owned(),
        }
        .into()
    })
}

// A concurrent creation that won the race surfaces as a primary key conflict
fn insert_settings(conn: &mut SqliteConnection, settings: &Settings) -> Result<(), Error> {
    use self::schema::user_settings;

    diesel::insert_into(user_settings::table)
        .values(settings)
        .execute(conn)
        .map_err(|e| match e {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => ServiceError::UserExists {
                identity: settings.identity.clone(),
            }
            .into(),
            other => Error::from(other),
        })?;

    Ok(())
}

fn find_owned_rule(conn: &mut SqliteConnection, identity: &str, key: &Uuid) -> Result<Rule, Error> {
    use self::schema::tick_rules::dsl::*;

    let rule = tick_rules
        .filter(rule_key.eq(key.to_string()))
        .filter(owner.eq(identity))
        .select(Rule::as_select())
        .first(conn)
        .optional()?;

    rule.ok_or_else(|| ServiceError::RuleNotFound { key: key.to_string() }.into())
}

pub struct CreateUser {
    pub identity: String,
}

impl Message for CreateUser {
    type Result = Result<UserSettings, Error>;
}

impl Handler<CreateUser> for DbExecutor {
    type Result = Result<UserSettings, Error>;

    fn handle(&mut self, msg: CreateUser, _: &mut Self::Context) -> Self::Result {
        let mut conn = self.0.get()?;

        // Read-then-write: the primary key catches whoever loses the race
        if load_settings(&mut *conn, &msg.identity)?.is_some() {
            return Err(ServiceError::UserExists {
                identity: msg.identity,
            }
            .into());
        }

        let settings = Settings::new(msg.identity.clone(), UserSettings::for_identity(&msg.identity));
        insert_settings(&mut *conn, &settings)?;

        info!("created settings for {}", msg.identity);

        Ok(settings.into())
    }
}

pub struct CreateRule {
    pub identity: String,
    pub rule: TickRule,
}

impl Message for CreateRule {
    type Result = Result<(Uuid, TickRule), Error>;
}

impl Handler<CreateRule> for DbExecutor {
    type Result = Result<(Uuid, TickRule), Error>;

    fn handle(&mut self, msg: CreateRule, _: &mut Self::Context) -> Self::Result {
        use self::schema::tick_rules;

        let mut conn = self.0.get()?;

        require_settings(&mut *conn, &msg.identity)?;

        let key = Uuid::new_v4();
        let rule_key = key.to_string();
        let new_rule = NewRule {
            rule_key: &rule_key,
            owner: &msg.identity,
            rule_name: &msg.rule.rule_name,
            is_bucketed: msg.rule.is_bucketed,
            bucket_minutes: msg.rule.bucket_duration.num_minutes(),
        };

        diesel::insert_into(tick_rules::table)
            .values(&new_rule)
            .execute(&mut *conn)?;

        info!("{} created rule {:?} ({})", msg.identity, msg.rule.rule_name, key);

        Ok((key, msg.rule))
    }
}

pub struct RecordTick {
    pub identity: String,
    pub rule_key: Uuid,
    pub entry: TickEntryValue,
}

impl Message for RecordTick {
    type Result = Result<(Uuid, TickEntryValue), Error>;
}

impl Handler<RecordTick> for DbExecutor {
    type Result = Result<(Uuid, TickEntryValue), Error>;

    fn handle(&mut self, msg: RecordTick, _: &mut Self::Context) -> Self::Result {
        use self::schema::tick_entries;

        let mut conn = self.0.get()?;

        let rule = find_owned_rule(&mut *conn, &msg.identity, &msg.rule_key)?;

        let key = Uuid::new_v4();
        diesel::insert_into(tick_entries::table)
            .values(&NewEntry::new(key.to_string(), rule.id, &msg.entry))
            .execute(&mut *conn)?;

        debug!("tick {} on rule {} = {}", key, msg.rule_key, msg.entry.value);

        Ok((key, msg.entry))
    }
}

/// Inserts a batch of entries under one rule as a single write.
pub struct InsertTicks {
    pub identity: String,
    pub rule_key: Uuid,
    pub entries: Vec<TickEntryValue>,
}

impl Message for InsertTicks {
    type Result = Result<usize, Error>;
}

impl Handler<InsertTicks> for DbExecutor {
    type Result = Result<usize, Error>;

    fn handle(&mut self, msg: InsertTicks, _: &mut Self::Context) -> Self::Result {
        use self::schema::tick_entries;

        if msg.entries.is_empty() {
            return Ok(0);
        }

        let mut conn = self.0.get()?;

        let rule = find_owned_rule(&mut *conn, &msg.identity, &msg.rule_key)?;

        let rows = msg
            .entries
            .iter()
            .map(|entry| NewEntry::new(Uuid::new_v4().to_string(), rule.id, entry))
            .collect::<Vec<_>>();

        let inserted = conn.transaction::<_, DieselError, _>(|conn| {
            let mut inserted = 0;
            for chunk in rows.chunks(INSERT_CHUNK) {
                inserted += diesel::insert_into(tick_entries::table)
                    .values(chunk)
                    .execute(conn)?;
            }
            Ok(inserted)
        })?;

        debug!("inserted {} ticks on rule {}", inserted, msg.rule_key);

        Ok(inserted)
    }
}

/// Settings, rules by name, and each rule's most recent entries.
pub struct GetDashboard {
    pub identity: String,
    pub entry_limit: i64,
}

impl Message for GetDashboard {
    type Result = Result<Dashboard, Error>;
}

impl Handler<GetDashboard> for DbExecutor {
    type Result = Result<Dashboard, Error>;

    fn handle(&mut self, msg: GetDashboard, _: &mut Self::Context) -> Self::Result {
        use self::schema::{tick_entries, tick_rules};

        let mut conn = self.0.get()?;

        let settings = require_settings(&mut *conn, &msg.identity)?;

        let rules = tick_rules::table
            .filter(tick_rules::owner.eq(&msg.identity))
            .order((tick_rules::rule_name.asc(), tick_rules::id.asc()))
            .select(Rule::as_select())
            .load(&mut *conn)?;

        let mut listings = Vec::with_capacity(rules.len());
        for rule in rules {
            // Newest first to apply the cap, then flipped back to chronological
            let mut entries = tick_entries::table
                .filter(tick_entries::rule_id.eq(rule.id))
                .order((tick_entries::recorded_at.desc(), tick_entries::id.desc()))
                .limit(msg.entry_limit)
                .select(Entry::as_select())
                .load(&mut *conn)?;
            entries.reverse();

            listings.push(RuleListing {
                rule_name: rule.rule_name,
                rule_key: rule.rule_key,
                entries: entries.into_iter().map(TickEntryValue::from).collect(),
            });
        }

        debug!("dashboard for {}: {} rules", msg.identity, listings.len());

        Ok(Dashboard {
            has_pebble: settings.has_pebble,
            twitter: settings.twitter,
            rules: listings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn executor() -> DbExecutor {
        DbExecutor(open_pool(":memory:", 1).unwrap())
    }

    fn conn(db: &DbExecutor) -> r2d2::PooledConnection<ConnectionManager<SqliteConnection>> {
        db.0.get().unwrap()
    }

    fn create_user(db: &DbExecutor, identity: &str) -> Settings {
        let settings = Settings::new(identity.into(), UserSettings::for_identity(identity));
        diesel::insert_into(schema::user_settings::table)
            .values(&settings)
            .execute(&mut *conn(db))
            .unwrap();
        settings
    }

    #[test]
    fn migrations_create_empty_tables() {
        let db = executor();
        let count: i64 = schema::tick_rules::table
            .count()
            .get_result(&mut *conn(&db))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn settings_lookup() {
        let db = executor();
        create_user(&db, "test@example.com");

        let mut conn = conn(&db);
        let found = load_settings(&mut *conn, "test@example.com").unwrap().unwrap();
        assert_eq!(found.twitter, "test");
        assert!(load_settings(&mut *conn, "other@example.com").unwrap().is_none());

        let err = ServiceError::from(require_settings(&mut *conn, "other@example.com").unwrap_err());
        assert_eq!(
            err,
            ServiceError::SettingsNotFound {
                identity: "other@example.com".into()
            }
        );
    }

    #[test]
    fn settings_conflict_is_user_exists() {
        let db = executor();
        let settings = create_user(&db, "test@example.com");

        let err = ServiceError::from(insert_settings(&mut *conn(&db), &settings).unwrap_err());
        assert_eq!(
            err,
            ServiceError::UserExists {
                identity: "test@example.com".into()
            }
        );
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let db = executor();
        let rule = NewRule {
            rule_key: "k",
            owner: "nobody@example.com",
            rule_name: "orphan",
            is_bucketed: true,
            bucket_minutes: 15,
        };

        let result = diesel::insert_into(schema::tick_rules::table)
            .values(&rule)
            .execute(&mut *conn(&db));

        match result {
            Err(DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _)) => {}
            other => panic!("expected foreign key violation, got {:?}", other),
        }
    }

    #[test]
    fn rules_are_scoped_to_their_owner() {
        let db = executor();
        create_user(&db, "a@example.com");
        create_user(&db, "b@example.com");

        let key = Uuid::new_v4();
        let rule_key = key.to_string();
        diesel::insert_into(schema::tick_rules::table)
            .values(&NewRule {
                rule_key: &rule_key,
                owner: "a@example.com",
                rule_name: "weight",
                is_bucketed: true,
                bucket_minutes: Duration::hours(24).num_minutes(),
            })
            .execute(&mut *conn(&db))
            .unwrap();

        let mut conn = conn(&db);
        let rule = find_owned_rule(&mut *conn, "a@example.com", &key).unwrap();
        assert_eq!(TickRule::from(rule), TickRule::daily("weight"));

        let err = ServiceError::from(find_owned_rule(&mut *conn, "b@example.com", &key).unwrap_err());
        assert_eq!(err, ServiceError::RuleNotFound { key: rule_key });
    }

    #[test]
    fn entries_round_trip_through_storage() {
        let db = executor();
        create_user(&db, "a@example.com");
        diesel::insert_into(schema::tick_rules::table)
            .values(&NewRule {
                rule_key: "r",
                owner: "a@example.com",
                rule_name: "weight",
                is_bucketed: true,
                bucket_minutes: 15,
            })
            .execute(&mut *conn(&db))
            .unwrap();
        let rule = schema::tick_rules::table
            .select(Rule::as_select())
            .first(&mut *conn(&db))
            .unwrap();

        let entry = TickEntryValue::now(42);
        diesel::insert_into(schema::tick_entries::table)
            .values(&NewEntry::new("e".into(), rule.id, &entry))
            .execute(&mut *conn(&db))
            .unwrap();

        let stored = schema::tick_entries::table
            .select(Entry::as_select())
            .first(&mut *conn(&db))
            .unwrap();
        assert_eq!(TickEntryValue::from(stored), entry);
    }
}
