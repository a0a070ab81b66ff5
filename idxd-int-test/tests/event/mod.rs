mod database_event_test;
