use uuid::Uuid;

pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

pub fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}
