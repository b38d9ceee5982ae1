use std::fmt;

/// Declared type of a canonical field for a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    TextList,
    Flag,
    /// Undeclared: first value stored as text, repeated values promote to a list.
    Untyped,
}

impl FieldKind {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "string" => FieldKind::Text,
            "array-string" => FieldKind::TextList,
            "boolean" => FieldKind::Flag,
            _ => FieldKind::Untyped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Profile {
    Teacher,
    Student,
    Relative,
    Personnel,
    Guest,
}

const COMMON_TEXT: &[&str] = &[
    "externalId",
    "lastName",
    "firstName",
    "surname",
    "birthDate",
    "email",
    "title",
    "homePhone",
    "workPhone",
    "mobile",
    "address",
    "zipCode",
    "city",
    "country",
    "login",
];

impl Profile {
    pub const ALL: [Profile; 5] = [
        Profile::Teacher,
        Profile::Student,
        Profile::Relative,
        Profile::Personnel,
        Profile::Guest,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "Teacher" => Some(Profile::Teacher),
            "Student" => Some(Profile::Student),
            "Relative" => Some(Profile::Relative),
            "Personnel" => Some(Profile::Personnel),
            "Guest" => Some(Profile::Guest),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Profile::Teacher => "Teacher",
            Profile::Student => "Student",
            Profile::Relative => "Relative",
            Profile::Personnel => "Personnel",
            Profile::Guest => "Guest",
        }
    }

    pub fn external_id(self) -> &'static str {
        match self {
            Profile::Teacher => "PROFILE_TEACHER",
            Profile::Student => "PROFILE_STUDENT",
            Profile::Relative => "PROFILE_RELATIVE",
            Profile::Personnel => "PROFILE_PERSONNEL",
            Profile::Guest => "PROFILE_GUEST",
        }
    }

    /// Position in the import chain. Profiles whose rows are referenced by
    /// other files (Student, referenced by Relative) must come first.
    pub fn import_rank(self) -> u8 {
        match self {
            Profile::Teacher => 0,
            Profile::Student => 1,
            Profile::Relative => 2,
            Profile::Personnel => 3,
            Profile::Guest => 4,
        }
    }

    /// Profiles whose rows this profile links to.
    pub fn depends_on(self) -> &'static [Profile] {
        match self {
            Profile::Relative => &[Profile::Student],
            _ => &[],
        }
    }

    pub fn field_kind(self, field: &str) -> FieldKind {
        if COMMON_TEXT.contains(&field) {
            return FieldKind::Text;
        }
        let tag = match (self, field) {
            (Profile::Student, "classes" | "groups") => "array-string",
            (Profile::Student, "level" | "sector" | "accommodation" | "status") => "string",
            (Profile::Student, "scholarshipHolder" | "transport") => "boolean",
            (Profile::Teacher, "classes" | "groups" | "functions" | "subjectTaught") => {
                "array-string"
            }
            (Profile::Teacher, "isTeacher") => "boolean",
            (Profile::Personnel, "classes" | "groups" | "functions") => "array-string",
            (Profile::Guest, "classes" | "groups") => "array-string",
            (Profile::Relative, "relativeType") => "string",
            _ => "",
        };
        FieldKind::parse(tag)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
