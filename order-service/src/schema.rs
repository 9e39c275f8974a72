diesel::table! {
    orders (id) {
        id -> Uuid,
        customer_id -> Uuid,
        restaurant_id -> Uuid,
        tracking_id -> Uuid,
        price -> Numeric,
        order_status -> Varchar,
        failure_messages -> Text,
        street -> Varchar,
        postal_code -> Varchar,
        city -> Varchar,
    }
}

diesel::table! {
    order_items (order_id, item_id) {
        order_id -> Uuid,
        item_id -> Int4,
        product_id -> Uuid,
        quantity -> Int4,
        price -> Numeric,
        subtotal -> Numeric,
    }
}

diesel::table! {
    order_sagas (id) {
        id -> Uuid,
        order_id -> Uuid,
        saga_status -> Varchar,
        last_event_id -> Nullable<Uuid>,
        version -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(order_items -> orders (order_id));
diesel::joinable!(order_sagas -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(orders, order_items, order_sagas);
