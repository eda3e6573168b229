//! SQLite-backed catalog store.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{
    CategoryStat, Gallery, GalleryRecord, GalleryRef, GalleryStore, PendingGallery, StoreError,
    TorrentRecord,
};

/// Upper bound on bound parameters per `IN (...)` statement.
const IN_CHUNK: usize = 500;

const GALLERY_COLUMNS: &str = "gid, token, archiver_key, title, title_jpn, category, thumb, \
     uploader, posted, filecount, filesize, expunged, removed, replaced, rating, torrentcount, \
     root_gid, bytorrent, tags";

/// SQLite-backed catalog store.
pub struct SqliteGalleryStore {
    conn: Mutex<Connection>,
}

impl SqliteGalleryStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS gallery (
                gid INTEGER PRIMARY KEY,
                token TEXT NOT NULL,
                archiver_key TEXT NOT NULL DEFAULT '',
                title TEXT NOT NULL DEFAULT '',
                title_jpn TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL DEFAULT '',
                thumb TEXT NOT NULL DEFAULT '',
                uploader TEXT,
                posted INTEGER NOT NULL,
                filecount INTEGER NOT NULL DEFAULT 0,
                filesize INTEGER NOT NULL DEFAULT 0,
                expunged INTEGER NOT NULL DEFAULT 0,
                removed INTEGER NOT NULL DEFAULT 0,
                replaced INTEGER NOT NULL DEFAULT 0,
                rating REAL NOT NULL DEFAULT 0,
                torrentcount INTEGER NOT NULL DEFAULT 0,
                root_gid INTEGER,
                bytorrent INTEGER NOT NULL DEFAULT 0,
                tags TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_gallery_posted ON gallery(posted);
            CREATE INDEX IF NOT EXISTS idx_gallery_group ON gallery(COALESCE(root_gid, gid));

            -- Torrents live under the root gallery of their group
            CREATE TABLE IF NOT EXISTS torrent (
                id INTEGER NOT NULL,
                gid INTEGER NOT NULL,
                name TEXT NOT NULL,
                hash TEXT,
                addedstr TEXT,
                fsizestr TEXT,
                uploader TEXT NOT NULL DEFAULT '',
                expunged INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (id, gid)
            );

            CREATE INDEX IF NOT EXISTS idx_torrent_gid_hash ON torrent(gid, hash);

            CREATE TABLE IF NOT EXISTS category_stats (
                category TEXT PRIMARY KEY,
                total INTEGER NOT NULL,
                refreshed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tag_stats (
                tag TEXT PRIMARY KEY,
                total INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))
    }

    fn row_to_gallery(row: &Row<'_>) -> rusqlite::Result<Gallery> {
        let posted: i64 = row.get(8)?;
        let tags_json: String = row.get(18)?;
        let tags: Vec<String> = serde_json::from_str(&tags_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(18, Type::Text, Box::new(e)))?;

        Ok(Gallery {
            gid: row.get::<_, i64>(0)? as u64,
            token: row.get(1)?,
            archiver_key: row.get(2)?,
            title: row.get(3)?,
            title_jpn: row.get(4)?,
            category: row.get(5)?,
            thumb: row.get(6)?,
            uploader: row.get(7)?,
            posted: DateTime::<Utc>::from_timestamp(posted, 0).unwrap_or_default(),
            filecount: row.get::<_, i64>(9)? as u32,
            filesize: row.get::<_, i64>(10)? as u64,
            expunged: row.get(11)?,
            removed: row.get(12)?,
            replaced: row.get(13)?,
            rating: row.get(14)?,
            torrentcount: row.get::<_, i64>(15)? as u32,
            root_gid: row.get::<_, Option<i64>>(16)?.map(|g| g as u64),
            by_torrent: row.get(17)?,
            tags,
        })
    }

    /// Run `SELECT <column> ... WHERE <column> IN (chunk)` for each chunk of ids.
    fn select_ids_in(
        conn: &Connection,
        sql_prefix: &str,
        ids: &[u64],
    ) -> Result<Vec<(u64, i64)>, StoreError> {
        let mut out = Vec::new();
        for chunk in ids.chunks(IN_CHUNK) {
            let sql = format!("{} ({})", sql_prefix, placeholders(chunk.len()));
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter().map(|id| *id as i64)), |row| {
                    Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            out.extend(rows);
        }
        Ok(out)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn tags_json(tags: &[String]) -> Result<String, StoreError> {
    serde_json::to_string(tags).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl GalleryStore for SqliteGalleryStore {
    fn last_posted(&self) -> Result<Option<i64>, StoreError> {
        let conn = self.conn()?;
        let posted = conn.query_row(
            "SELECT MAX(posted) FROM gallery WHERE bytorrent = 0",
            [],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(posted)
    }

    fn posted_for(&self, gids: &[u64]) -> Result<HashMap<u64, i64>, StoreError> {
        let conn = self.conn()?;
        let rows = Self::select_ids_in(&conn, "SELECT gid, posted FROM gallery WHERE gid IN", gids)?;
        Ok(rows.into_iter().collect())
    }

    fn insert_gallery(&self, record: &GalleryRecord) -> Result<(), StoreError> {
        let tags = tags_json(&record.tags)?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO gallery (gid, token, archiver_key, title, title_jpn, category, thumb,
                                 uploader, posted, filecount, filesize, expunged, rating,
                                 torrentcount, tags)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                record.gid as i64,
                record.token,
                record.archiver_key,
                record.title,
                record.title_jpn,
                record.category,
                record.thumb,
                record.uploader,
                record.posted,
                record.filecount as i64,
                record.filesize as i64,
                record.expunged,
                record.rating,
                record.torrentcount as i64,
                tags,
            ],
        )?;
        Ok(())
    }

    fn update_gallery(&self, record: &GalleryRecord) -> Result<(), StoreError> {
        let tags = tags_json(&record.tags)?;
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE gallery
            SET token = ?2, archiver_key = ?3, title = ?4, title_jpn = ?5, category = ?6,
                thumb = ?7, uploader = ?8, posted = ?9, filecount = ?10, filesize = ?11,
                expunged = ?12, rating = ?13, torrentcount = ?14, tags = ?15, bytorrent = 0
            WHERE gid = ?1
            "#,
            params![
                record.gid as i64,
                record.token,
                record.archiver_key,
                record.title,
                record.title_jpn,
                record.category,
                record.thumb,
                record.uploader,
                record.posted,
                record.filecount as i64,
                record.filesize as i64,
                record.expunged,
                record.rating,
                record.torrentcount as i64,
                tags,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(record.gid));
        }
        Ok(())
    }

    fn refresh_stats(&self) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute("DELETE FROM category_stats", [])?;
        tx.execute(
            r#"
            INSERT INTO category_stats (category, total, refreshed_at)
            SELECT category, COUNT(*), ?1
            FROM gallery
            WHERE removed = 0 AND replaced = 0
            GROUP BY category
            "#,
            params![now],
        )?;

        tx.execute("DELETE FROM tag_stats", [])?;
        tx.execute(
            r#"
            INSERT INTO tag_stats (tag, total)
            SELECT t.value, COUNT(*)
            FROM gallery g, json_each(g.tags) t
            WHERE g.removed = 0 AND g.replaced = 0
            GROUP BY t.value
            "#,
            [],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn galleries_posted_since(&self, since: i64) -> Result<Vec<GalleryRef>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT gid, token FROM gallery WHERE posted >= ?1 ORDER BY gid")?;
        let refs = stmt
            .query_map(params![since], |row| {
                Ok(GalleryRef {
                    gid: row.get::<_, i64>(0)? as u64,
                    token: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(refs)
    }

    fn unresolved_galleries(&self) -> Result<Vec<PendingGallery>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT gid, token, posted FROM gallery \
             WHERE root_gid IS NULL AND removed = 0 ORDER BY gid",
        )?;
        let pending = stmt
            .query_map([], |row| {
                Ok(PendingGallery {
                    gid: row.get::<_, i64>(0)? as u64,
                    token: row.get(1)?,
                    posted: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pending)
    }

    fn existing_gids(&self, gids: &[u64]) -> Result<HashSet<u64>, StoreError> {
        let conn = self.conn()?;
        let rows = Self::select_ids_in(&conn, "SELECT gid, gid FROM gallery WHERE gid IN", gids)?;
        Ok(rows.into_iter().map(|(gid, _)| gid).collect())
    }

    fn mark_by_torrent(&self, gids: &[u64]) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let mut changed = 0;
        for chunk in gids.chunks(IN_CHUNK) {
            let sql = format!(
                "UPDATE gallery SET bytorrent = 1 WHERE gid IN ({})",
                placeholders(chunk.len())
            );
            changed += conn.execute(&sql, params_from_iter(chunk.iter().map(|g| *g as i64)))?;
        }
        Ok(changed as u64)
    }

    fn mark_removed(&self, gid: u64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE gallery SET removed = 1 WHERE gid = ?1",
            params![gid as i64],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(gid));
        }
        Ok(())
    }

    fn set_root_gid(&self, gid: u64, root_gid: u64) -> Result<Option<u64>, StoreError> {
        let conn = self.conn()?;
        let previous = conn
            .query_row(
                "SELECT root_gid FROM gallery WHERE gid = ?1",
                params![gid as i64],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound(gid))?;

        conn.execute(
            "UPDATE gallery SET root_gid = ?2 WHERE gid = ?1",
            params![gid as i64, root_gid as i64],
        )?;
        Ok(previous.map(|g| g as u64))
    }

    fn mark_replaced_group(&self, group: u64) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE gallery
            SET replaced = (gid <> (SELECT MAX(g.gid) FROM gallery g
                                    WHERE COALESCE(g.root_gid, g.gid) = ?1))
            WHERE COALESCE(root_gid, gid) = ?1
            "#,
            params![group as i64],
        )?;
        Ok(changed as u64)
    }

    fn mark_replaced_all(&self) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE gallery
            SET replaced = (gid NOT IN (SELECT MAX(gid) FROM gallery
                                        GROUP BY COALESCE(root_gid, gid)))
            "#,
            [],
        )?;
        Ok(changed as u64)
    }

    fn last_torrent_id(&self) -> Result<Option<u64>, StoreError> {
        let conn = self.conn()?;
        let id = conn.query_row("SELECT MAX(id) FROM torrent", [], |row| {
            row.get::<_, Option<i64>>(0)
        })?;
        Ok(id.map(|id| id as u64))
    }

    fn known_torrent_ids(&self, ids: &[u64]) -> Result<HashSet<u64>, StoreError> {
        let conn = self.conn()?;
        let rows = Self::select_ids_in(&conn, "SELECT id, id FROM torrent WHERE id IN", ids)?;
        Ok(rows.into_iter().map(|(id, _)| id).collect())
    }

    fn torrent_hashes(&self, root_gid: u64) -> Result<HashSet<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT hash FROM torrent WHERE gid = ?1 AND hash IS NOT NULL")?;
        let hashes = stmt
            .query_map(params![root_gid as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(hashes)
    }

    fn upsert_torrent(&self, root_gid: u64, torrent: &TorrentRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO torrent (id, gid, name, hash, addedstr, fsizestr, uploader, expunged)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (id, gid) DO UPDATE SET
                name = excluded.name,
                hash = excluded.hash,
                addedstr = excluded.addedstr,
                fsizestr = excluded.fsizestr,
                uploader = excluded.uploader,
                expunged = excluded.expunged
            "#,
            params![
                torrent.id as i64,
                root_gid as i64,
                torrent.name,
                torrent.hash,
                torrent.added_at,
                torrent.size_text,
                torrent.uploader,
                torrent.expunged,
            ],
        )?;
        Ok(())
    }

    fn get_gallery(&self, gid: u64) -> Result<Option<Gallery>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM gallery WHERE gid = ?1", GALLERY_COLUMNS);
        let gallery = conn
            .query_row(&sql, params![gid as i64], Self::row_to_gallery)
            .optional()?;
        Ok(gallery)
    }

    fn torrents_for_group(&self, root_gid: u64) -> Result<Vec<TorrentRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, hash, addedstr, fsizestr, uploader, expunged \
             FROM torrent WHERE gid = ?1 ORDER BY id",
        )?;
        let torrents = stmt
            .query_map(params![root_gid as i64], |row| {
                Ok(TorrentRecord {
                    id: row.get::<_, i64>(0)? as u64,
                    name: row.get(1)?,
                    hash: row.get(2)?,
                    added_at: row.get(3)?,
                    size_text: row.get(4)?,
                    uploader: row.get(5)?,
                    expunged: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(torrents)
    }

    fn category_stats(&self) -> Result<Vec<CategoryStat>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT category, total FROM category_stats ORDER BY category")?;
        let stats = stmt
            .query_map([], |row| {
                Ok(CategoryStat {
                    category: row.get(0)?,
                    total: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stats)
    }
}
