use rand::{distributions::Alphanumeric, thread_rng, Rng};

const INVOICE_ID_LEN: usize = 22;
const ACCESS_TOKEN_LEN: usize = 32;

/// A fresh opaque invoice id. Merchant-visible, never reused.
pub fn new_invoice_id() -> String {
    random_alphanumeric(INVOICE_ID_LEN)
}

/// A fresh access token for status queries.
pub fn new_access_token() -> String {
    random_alphanumeric(ACCESS_TOKEN_LEN)
}

fn random_alphanumeric(len: usize) -> String {
    thread_rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}
