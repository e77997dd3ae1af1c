//! Integration tests for cascading deletes

mod common;

use common::*;
use objectkeep::{Configuration, Database, Persistable, PrimaryKey, UpdatePolicy};

fn seed_owners(db: &Database) {
    owner(
        1,
        "Ann",
        vec![pet(10, "Rex", vec![toy(100, "ball"), toy(101, "rope")]), pet(11, "Tom", vec![])],
        Some(home(7, "Main St")),
    )
    .save(db, UpdatePolicy::All)
    .unwrap();
    owner(2, "Bob", vec![pet(20, "Max", vec![toy(200, "bone")])], Some(home(8, "Side St")))
        .save(db, UpdatePolicy::All)
        .unwrap();
}

fn ids<T: Persistable>(db: &Database) -> Vec<PrimaryKey> {
    T::all(db).iter().map(|m| m.primary_key().clone()).collect()
}

fn int_keys(ids: &[i64]) -> Vec<PrimaryKey> {
    ids.iter().map(|&id| PrimaryKey::Int(id)).collect()
}

fn text_keys(ids: &[&str]) -> Vec<PrimaryKey> {
    ids.iter().map(|&id| PrimaryKey::from(id)).collect()
}

#[test]
fn test_cascading_delete_removes_reachable_objects_only() {
    let db = open_db("cascade-reachable");
    seed_owners(&db);

    Owner::get(&db, 1).unwrap().delete(true);

    assert_eq!(ids::<Owner>(&db), int_keys(&[2]));
    assert_eq!(ids::<Pet>(&db), int_keys(&[20]));
    assert_eq!(ids::<Toy>(&db), int_keys(&[200]));
    assert_eq!(ids::<Home>(&db), int_keys(&[8]));
}

#[test]
fn test_non_cascading_delete_leaves_related_objects() {
    let db = open_db("cascade-off");
    seed_owners(&db);

    Owner::get(&db, 1).unwrap().delete(false);

    assert_eq!(ids::<Owner>(&db), int_keys(&[2]));
    assert_eq!(Pet::all(&db).len(), 3);
    assert_eq!(Toy::all(&db).len(), 3);
    assert_eq!(Home::all(&db).len(), 2);
}

#[test]
fn test_cascading_delete_of_plain_value() {
    let db = open_db("cascade-plain");
    seed_owners(&db);

    // An unmanaged value deletes its stored counterpart.
    owner(2, "", vec![], None).delete(&db, true);

    assert_eq!(ids::<Owner>(&db), int_keys(&[1]));
    assert_eq!(ids::<Pet>(&db), int_keys(&[10, 11]));
    assert_eq!(ids::<Home>(&db), int_keys(&[7]));
}

#[test]
fn test_cycle_terminates_and_deletes_each_object_once() {
    let db = open_db("cascade-cycle");
    node(1, "one", Some(node(2, "two", Some(node(1, "one", None)))))
        .save(&db, UpdatePolicy::All)
        .unwrap();
    node(3, "three", None).save(&db, UpdatePolicy::All).unwrap();

    let removed = db
        .session()
        .delete_objects([Node::get(&db, 1).unwrap().key().clone()], true)
        .unwrap();

    assert_eq!(removed, 2);
    assert_eq!(ids::<Node>(&db), int_keys(&[3]));
}

#[test]
fn test_shared_object_is_deleted_once_and_unlinked() {
    let db = open_db("cascade-shared");
    let shared = pet(10, "Rex", vec![toy(100, "ball")]);
    owner(1, "Ann", vec![shared.clone()], None)
        .save(&db, UpdatePolicy::All)
        .unwrap();
    owner(2, "Bob", vec![shared], None)
        .save(&db, UpdatePolicy::All)
        .unwrap();

    let removed = db
        .session()
        .delete_objects([Owner::get(&db, 1).unwrap().key().clone()], true)
        .unwrap();
    assert_eq!(removed, 3);

    let bob = Owner::get(&db, 2).unwrap().value().unwrap();
    assert!(bob.pets.is_empty());
    assert!(Toy::all(&db).is_empty());
}

#[test]
fn test_back_reference_cascade() {
    let db = open_db("cascade-backref");
    let red = team("red", "Red");
    let blue = team("blue", "Blue");
    member("m1", "Ann", Some(red.clone())).save(&db, UpdatePolicy::All).unwrap();
    member("m2", "Bob", Some(red.clone())).save(&db, UpdatePolicy::All).unwrap();
    member("m3", "Cat", Some(blue)).save(&db, UpdatePolicy::All).unwrap();
    member("m4", "Dan", None).save(&db, UpdatePolicy::All).unwrap();

    red.delete(&db, true);

    assert_eq!(ids::<Team>(&db), text_keys(&["blue"]));
    assert_eq!(ids::<Member>(&db), text_keys(&["m3", "m4"]));
}

#[test]
fn test_back_reference_without_cascade_leaves_members() {
    let db = open_db("backref-no-cascade");
    let red = team("red", "Red");
    member("m1", "Ann", Some(red.clone())).save(&db, UpdatePolicy::All).unwrap();

    red.delete(&db, false);

    let ann = Member::get(&db, "m1".to_string()).unwrap().value().unwrap();
    assert!(ann.team.is_none());
}

#[test]
#[should_panic(expected = "Object type not specified for cascade delete")]
fn test_back_reference_without_declared_type_panics() {
    let db = Database::open(
        Configuration::in_memory("cascade-undeclared").object_types(vec![&GUILD, &RECRUIT]),
    )
    .unwrap();
    let guild = Guild {
        id: 1,
        recruits: Vec::new(),
    };
    Recruit {
        id: 1,
        guild: Some(Box::new(guild.clone())),
    }
    .save(&db, UpdatePolicy::All)
    .unwrap();

    guild.delete(&db, true);
}

#[test]
fn test_type_level_delete_all() {
    let db = open_db("cascade-delete-all");
    seed_owners(&db);
    model("a", "", 0).save(&db, UpdatePolicy::All).unwrap();

    let removed = Owner::delete_all(&db, true);

    assert_eq!(removed, 10);
    assert!(Owner::all(&db).is_empty());
    assert!(Pet::all(&db).is_empty());
    assert!(Toy::all(&db).is_empty());
    assert!(Home::all(&db).is_empty());
    assert_eq!(Model::all(&db).len(), 1);
}

#[test]
fn test_cascade_joins_open_write_transaction() {
    let db = open_db("cascade-joins");
    seed_owners(&db);
    let before = db.version().unwrap();

    let session = db.session();
    session
        .write(|s| {
            Owner::get(&db, 1).unwrap().try_delete(true)?;
            Owner::get(&db, 2).unwrap().try_delete(true)?;
            assert!(s.is_in_write_transaction());
            Ok(())
        })
        .unwrap();

    assert_eq!(db.version().unwrap(), before + 1);
    assert!(Pet::all(&db).is_empty());
}
