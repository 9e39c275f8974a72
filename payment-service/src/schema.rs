diesel::table! {
    payments (id) {
        id -> Uuid,
        customer_id -> Uuid,
        order_id -> Uuid,
        saga_id -> Uuid,
        price -> Numeric,
        payment_status -> Varchar,
        failure_messages -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    credit_entries (customer_id) {
        customer_id -> Uuid,
        total_credit -> Numeric,
    }
}

diesel::allow_tables_to_appear_in_same_query!(payments, credit_entries);
