//! Model types shared by the integration tests.

#![allow(dead_code)]

use objectkeep::{
    CascadeRule, Configuration, Database, Field, ObjectSchema, Persistable, ScalarType,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Model: flat type with a string key
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub count: i64,
}

const MODEL_FIELDS: &[Field] = &[
    Field::scalar("id", ScalarType::String),
    Field::scalar("type", ScalarType::String),
    Field::scalar("count", ScalarType::Int),
];
pub static MODEL: ObjectSchema = ObjectSchema::new("Model", "id", MODEL_FIELDS);

impl Persistable for Model {
    type Id = String;

    fn schema() -> &'static ObjectSchema {
        &MODEL
    }

    fn id(&self) -> String {
        self.id.clone()
    }
}

pub fn model(id: &str, kind: &str, count: i64) -> Model {
    Model {
        id: id.to_string(),
        kind: kind.to_string(),
        count,
    }
}

// ============================================================================
// Owner -> Pet -> Toy, Owner -> Home
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub id: i64,
    pub name: String,
    pub pets: Vec<Pet>,
    pub home: Option<Box<Home>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pet {
    pub id: i64,
    pub name: String,
    pub toys: Vec<Toy>,
    #[serde(default)]
    pub owners: Vec<Owner>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Toy {
    pub id: i64,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Home {
    pub id: i64,
    pub address: String,
}

const OWNER_FIELDS: &[Field] = &[
    Field::scalar("id", ScalarType::Int),
    Field::scalar("name", ScalarType::String),
    Field::many_ref("pets", "Pet"),
    Field::single_ref("home", "Home"),
];
const OWNER_CASCADE: &[CascadeRule] = &[("pets", None), ("home", None)];
pub static OWNER: ObjectSchema =
    ObjectSchema::new("Owner", "id", OWNER_FIELDS).with_cascade(OWNER_CASCADE);

const PET_FIELDS: &[Field] = &[
    Field::scalar("id", ScalarType::Int),
    Field::scalar("name", ScalarType::String),
    Field::many_ref("toys", "Toy"),
    Field::back_ref("owners", "pets"),
];
const PET_CASCADE: &[CascadeRule] = &[("toys", None)];
pub static PET: ObjectSchema = ObjectSchema::new("Pet", "id", PET_FIELDS).with_cascade(PET_CASCADE);

const TOY_FIELDS: &[Field] = &[
    Field::scalar("id", ScalarType::Int),
    Field::scalar("label", ScalarType::String),
];
pub static TOY: ObjectSchema = ObjectSchema::new("Toy", "id", TOY_FIELDS);

const HOME_FIELDS: &[Field] = &[
    Field::scalar("id", ScalarType::Int),
    Field::scalar("address", ScalarType::String),
];
pub static HOME: ObjectSchema = ObjectSchema::new("Home", "id", HOME_FIELDS);

impl Persistable for Owner {
    type Id = i64;

    fn schema() -> &'static ObjectSchema {
        &OWNER
    }

    fn id(&self) -> i64 {
        self.id
    }
}

impl Persistable for Pet {
    type Id = i64;

    fn schema() -> &'static ObjectSchema {
        &PET
    }

    fn id(&self) -> i64 {
        self.id
    }
}

impl Persistable for Toy {
    type Id = i64;

    fn schema() -> &'static ObjectSchema {
        &TOY
    }

    fn id(&self) -> i64 {
        self.id
    }
}

impl Persistable for Home {
    type Id = i64;

    fn schema() -> &'static ObjectSchema {
        &HOME
    }

    fn id(&self) -> i64 {
        self.id
    }
}

pub fn toy(id: i64, label: &str) -> Toy {
    Toy {
        id,
        label: label.to_string(),
    }
}

pub fn pet(id: i64, name: &str, toys: Vec<Toy>) -> Pet {
    Pet {
        id,
        name: name.to_string(),
        toys,
        owners: Vec::new(),
    }
}

pub fn owner(id: i64, name: &str, pets: Vec<Pet>, home: Option<Home>) -> Owner {
    Owner {
        id,
        name: name.to_string(),
        pets,
        home: home.map(Box::new),
    }
}

pub fn home(id: i64, address: &str) -> Home {
    Home {
        id,
        address: address.to_string(),
    }
}

// ============================================================================
// Node: self-referencing chain that may loop
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub label: String,
    pub next: Option<Box<Node>>,
}

const NODE_FIELDS: &[Field] = &[
    Field::scalar("id", ScalarType::Int),
    Field::scalar("label", ScalarType::String),
    Field::single_ref("next", "Node"),
];
const NODE_CASCADE: &[CascadeRule] = &[("next", None)];
pub static NODE: ObjectSchema = ObjectSchema::new("Node", "id", NODE_FIELDS).with_cascade(NODE_CASCADE);

impl Persistable for Node {
    type Id = i64;

    fn schema() -> &'static ObjectSchema {
        &NODE
    }

    fn id(&self) -> i64 {
        self.id
    }
}

pub fn node(id: i64, label: &str, next: Option<Node>) -> Node {
    Node {
        id,
        label: label.to_string(),
        next: next.map(Box::new),
    }
}

// ============================================================================
// Team <- Member, deleted through the back-reference
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub name: String,
    pub team: Option<Box<Team>>,
}

const TEAM_FIELDS: &[Field] = &[
    Field::scalar("id", ScalarType::String),
    Field::scalar("name", ScalarType::String),
    Field::back_ref("members", "team"),
];
const TEAM_CASCADE: &[CascadeRule] = &[("members", Some("Member"))];
pub static TEAM: ObjectSchema = ObjectSchema::new("Team", "id", TEAM_FIELDS).with_cascade(TEAM_CASCADE);

const MEMBER_FIELDS: &[Field] = &[
    Field::scalar("id", ScalarType::String),
    Field::scalar("name", ScalarType::String),
    Field::single_ref("team", "Team"),
];
pub static MEMBER: ObjectSchema = ObjectSchema::new("Member", "id", MEMBER_FIELDS);

impl Persistable for Team {
    type Id = String;

    fn schema() -> &'static ObjectSchema {
        &TEAM
    }

    fn id(&self) -> String {
        self.id.clone()
    }
}

impl Persistable for Member {
    type Id = String;

    fn schema() -> &'static ObjectSchema {
        &MEMBER
    }

    fn id(&self) -> String {
        self.id.clone()
    }
}

pub fn team(id: &str, name: &str) -> Team {
    Team {
        id: id.to_string(),
        name: name.to_string(),
        members: Vec::new(),
    }
}

pub fn member(id: &str, name: &str, team: Option<Team>) -> Member {
    Member {
        id: id.to_string(),
        name: name.to_string(),
        team: team.map(Box::new),
    }
}

// ============================================================================
// Guild <- Recruit: back-reference cascade without a declared type
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: i64,
    #[serde(default)]
    pub recruits: Vec<Recruit>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recruit {
    pub id: i64,
    pub guild: Option<Box<Guild>>,
}

const GUILD_FIELDS: &[Field] = &[
    Field::scalar("id", ScalarType::Int),
    Field::back_ref("recruits", "guild"),
];
const GUILD_CASCADE: &[CascadeRule] = &[("recruits", None)];
pub static GUILD: ObjectSchema = ObjectSchema::new("Guild", "id", GUILD_FIELDS).with_cascade(GUILD_CASCADE);

const RECRUIT_FIELDS: &[Field] = &[
    Field::scalar("id", ScalarType::Int),
    Field::single_ref("guild", "Guild"),
];
pub static RECRUIT: ObjectSchema = ObjectSchema::new("Recruit", "id", RECRUIT_FIELDS);

impl Persistable for Guild {
    type Id = i64;

    fn schema() -> &'static ObjectSchema {
        &GUILD
    }

    fn id(&self) -> i64 {
        self.id
    }
}

impl Persistable for Recruit {
    type Id = i64;

    fn schema() -> &'static ObjectSchema {
        &RECRUIT
    }

    fn id(&self) -> i64 {
        self.id
    }
}

// ============================================================================
// Databases
// ============================================================================

pub fn all_types() -> Vec<&'static ObjectSchema> {
    vec![&MODEL, &OWNER, &PET, &TOY, &HOME, &NODE, &TEAM, &MEMBER]
}

pub fn open_db(name: &str) -> Database {
    Database::open(Configuration::in_memory(name).object_types(all_types())).unwrap()
}
