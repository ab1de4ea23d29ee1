use serde::Serialize;

/// Closed set of dashboard roles. Menu dispatch is a pure mapping from role
/// to a static descriptor list; unknown roles fall back to the student menu,
/// matching the shipped dashboard behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    SuperAdmin,
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "super_admin" => Some(Self::SuperAdmin),
            "admin" => Some(Self::Admin),
            "teacher" => Some(Self::Teacher),
            "student" => Some(Self::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MenuItem {
    pub label: &'static str,
    pub route: &'static str,
    pub icon: &'static str,
}

const fn entry(label: &'static str, route: &'static str, icon: &'static str) -> MenuItem {
    MenuItem { label, route, icon }
}

const ADMIN_MENU: &[MenuItem] = &[
    entry("Dashboard", "/dashboard", "dashboard"),
    entry("Students", "/dashboard/students", "students"),
    entry("Teachers", "/dashboard/teachers", "teachers"),
    entry("Classes", "/dashboard/classes", "classes"),
    entry("Attendance", "/dashboard/attendance", "attendance"),
    entry("Exams", "/dashboard/exams", "exams"),
    entry("Fees", "/dashboard/fees", "fees"),
    entry("Reports", "/dashboard/reports", "reports"),
    entry("Settings", "/dashboard/settings", "settings"),
];

const TEACHER_MENU: &[MenuItem] = &[
    entry("Dashboard", "/dashboard", "dashboard"),
    entry("My Classes", "/dashboard/my-classes", "classes"),
    entry("Students", "/dashboard/students", "students"),
    entry("Attendance", "/dashboard/attendance", "attendance"),
    entry("Create Paper", "/dashboard/create-paper", "exams"),
    entry("Performance", "/dashboard/performance", "reports"),
    entry("My Profile", "/dashboard/teacher-profile", "profile"),
];

const STUDENT_MENU: &[MenuItem] = &[
    entry("Dashboard", "/dashboard", "dashboard"),
    entry("My Performance", "/dashboard/student-performance", "reports"),
    entry("Attendance", "/dashboard/student-attendance", "attendance"),
    entry("Fees", "/dashboard/student-fees", "fees"),
    entry("My Profile", "/dashboard/student-profile", "profile"),
];

pub fn menu_for(role: Role) -> &'static [MenuItem] {
    match role {
        // Super admin and admin share one menu in the shipped dashboard.
        Role::SuperAdmin | Role::Admin => ADMIN_MENU,
        Role::Teacher => TEACHER_MENU,
        Role::Student => STUDENT_MENU,
    }
}
